//! Process-wide session observation.
//!
//! [`SessionObserver`] holds the one subscription to the identity provider's
//! current-user stream and fans every push out to its subscribers in arrival
//! order. It is the only writer of the current [`Session`]. Construct one per
//! process (or per test) and call [`SessionObserver::start`]; it is not a
//! global.
//!
//! [`RouteGuard`] gates protected views on the observed session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use packup_core::Session;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::providers::IdentityProvider;
use crate::routes::Route;
use crate::telemetry::{clear_sentry_user, set_sentry_user};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session observer already started")]
    AlreadyStarted,
}

/// What the observer knows about the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The provider has not reported yet.
    Unresolved,
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) => Some(session),
            Self::Unresolved | Self::SignedOut => None,
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

type Subscriber = mpsc::UnboundedSender<Option<Session>>;

/// Fan-out of the provider's current-user stream.
#[derive(Clone)]
pub struct SessionObserver {
    inner: Arc<ObserverInner>,
}

struct ObserverInner {
    current: watch::Sender<SessionState>,
    /// Guarded together with every publish so subscribing and publishing
    /// are totally ordered.
    subscribers: Mutex<Subscribers>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, Subscriber>,
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SessionObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver {
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(SessionState::Unresolved);
        Self {
            inner: Arc::new(ObserverInner {
                current,
                subscribers: Mutex::new(Subscribers::default()),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Open the provider subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] if the observer is running;
    /// there is only ever one provider subscription.
    pub fn start<I: IdentityProvider>(&self, provider: &I) -> Result<(), SessionError> {
        let mut pump = lock(&self.inner.pump);
        if pump.is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        let mut pushes = provider.observe_session();
        let observer = Arc::downgrade(&self.inner);
        *pump = Some(tokio::spawn(async move {
            while let Some(user) = pushes.next().await {
                let Some(inner) = Weak::upgrade(&observer) else {
                    return;
                };
                publish(&inner, user.map(Session::from));
            }
            warn!("Identity provider closed the session stream");
        }));
        info!("Session observer started");
        Ok(())
    }

    /// Close the provider subscription and disconnect every subscriber.
    ///
    /// The last known session stays readable; [`start`](Self::start) may be
    /// called again.
    pub fn shutdown(&self) {
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        lock(&self.inner.subscribers).senders.clear();
        info!("Session observer stopped");
    }

    /// Current state, without waiting.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.current.borrow().clone()
    }

    /// Current session, without waiting.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.inner.current.borrow().session().cloned()
    }

    /// The session once the provider has reported at least once.
    pub async fn resolved(&self) -> Option<Session> {
        let mut rx = self.inner.current.subscribe();
        rx.wait_for(SessionState::is_resolved)
            .await
            .ok()
            .and_then(|state| state.session().cloned())
    }

    /// Receiver of the current state. Intermediate states may be skipped;
    /// use [`subscribe`](Self::subscribe) to see every push.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.current.subscribe()
    }

    /// Subscribe to every subsequent push.
    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = lock(&self.inner.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, tx);
        // Read under the same lock as publish, so nothing falls in between.
        let initial = self.state();
        drop(subscribers);

        SessionSubscription {
            id,
            initial,
            rx,
            observer: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).senders.len()
    }
}

/// Publish one provider push to the cell and every subscriber.
fn publish(inner: &ObserverInner, next: Option<Session>) {
    let mut subscribers = lock(&inner.subscribers);

    match &next {
        Some(session) => {
            set_sentry_user(session);
            debug!(identity_id = %session.identity_id, "Session published");
        }
        None => {
            clear_sentry_user();
            debug!("Signed-out state published");
        }
    }
    inner.current.send_replace(
        next.clone()
            .map_or(SessionState::SignedOut, SessionState::SignedIn),
    );
    subscribers
        .senders
        .retain(|_, subscriber| subscriber.send(next.clone()).is_ok());
}

/// One subscriber's view of session pushes.
///
/// Dropping the subscription unsubscribes; [`unsubscribe`](Self::unsubscribe)
/// may be called any number of times.
pub struct SessionSubscription {
    id: u64,
    initial: SessionState,
    rx: mpsc::UnboundedReceiver<Option<Session>>,
    observer: Weak<ObserverInner>,
    active: bool,
}

impl SessionSubscription {
    /// State at the moment of subscribing.
    #[must_use]
    pub const fn initial(&self) -> &SessionState {
        &self.initial
    }

    /// Next published value, in push order. `None` once unsubscribed or the
    /// observer stopped.
    pub async fn changed(&mut self) -> Option<Option<Session>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.rx.close();
        if let Some(inner) = self.observer.upgrade() {
            lock(&inner.subscribers).senders.remove(&self.id);
        }
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// =============================================================================
// Route guard
// =============================================================================

/// Admission to a protected view.
///
/// [`enter`](Self::enter) resolves before the view renders; the guard then
/// keeps watching so the view can leave as soon as the session is revoked.
pub struct RouteGuard {
    session: Session,
    subscription: SessionSubscription,
}

impl RouteGuard {
    /// Admit the caller if a session exists, waiting for the provider's
    /// first report if needed.
    ///
    /// # Errors
    ///
    /// Returns the entry route ([`Route::Home`]) to redirect to when there is
    /// no session.
    pub async fn enter(observer: &SessionObserver) -> Result<Self, Route> {
        let mut subscription = observer.subscribe();
        let mut state = subscription.initial().clone();
        loop {
            match state {
                SessionState::SignedIn(session) => {
                    return Ok(Self {
                        session,
                        subscription,
                    });
                }
                SessionState::SignedOut => return Err(Route::Home),
                SessionState::Unresolved => match subscription.changed().await {
                    Some(next) => {
                        state = next.map_or(SessionState::SignedOut, SessionState::SignedIn);
                    }
                    None => return Err(Route::Home),
                },
            }
        }
    }

    /// The admitted session (kept current while the guard lives).
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve when the session goes away, with the route to redirect to.
    pub async fn revoked(&mut self) -> Route {
        loop {
            match self.subscription.changed().await {
                Some(Some(session)) => self.session = session,
                Some(None) | None => {
                    info!("Session revoked, leaving protected view");
                    return Route::Home;
                }
            }
        }
    }
}
