//! Debounced username availability checks.
//!
//! The status is keyed to the current input only: every keystroke resets it
//! to [`Availability::Idle`] before anything else happens, and a probe result
//! is applied only while the input it was issued for is still current.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use packup_core::Username;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::providers::{SearchHit, SearchIndex};

/// Attribute of the users index holding the username.
pub const USERNAME_ATTRIBUTE: &str = "username";

/// Availability of the username currently typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Nothing known about the current input.
    Idle,
    Checking,
    Available,
    Taken,
}

/// Probes a search index for the username being typed.
pub struct AvailabilityProber<S> {
    inner: Arc<ProberInner<S>>,
}

struct ProberInner<S> {
    search: Arc<S>,
    index: String,
    debounce: Duration,
    status: watch::Sender<Availability>,
    probe: Mutex<ProbeState>,
}

#[derive(Default)]
struct ProbeState {
    input: String,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl<S> Drop for ProberInner<S> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.probe).task.take() {
            task.abort();
        }
    }
}

fn lock(mutex: &Mutex<ProbeState>) -> MutexGuard<'_, ProbeState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: SearchIndex> AvailabilityProber<S> {
    #[must_use]
    pub fn new(search: Arc<S>, index: impl Into<String>, debounce: Duration) -> Self {
        let (status, _) = watch::channel(Availability::Idle);
        Self {
            inner: Arc::new(ProberInner {
                search,
                index: index.into(),
                debounce,
                status,
                probe: Mutex::new(ProbeState::default()),
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> Availability {
        *self.inner.status.borrow()
    }

    /// Receiver of every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Availability> {
        self.inner.status.subscribe()
    }

    /// The normalised input the status refers to.
    #[must_use]
    pub fn current_input(&self) -> String {
        lock(&self.inner.probe).input.clone()
    }

    /// Whether the last completed probe reported `username` as free.
    #[must_use]
    pub fn is_available_for(&self, username: &Username) -> bool {
        let probe = lock(&self.inner.probe);
        probe.input == username.as_str() && *self.inner.status.borrow() == Availability::Available
    }

    /// Feed a new raw input value.
    ///
    /// Returns the normalised value. The probe runs once the input has been
    /// stable for the debounce window; inputs shorter than
    /// [`Username::MIN_LENGTH`] never reach the index.
    pub fn input_changed(&self, raw: &str) -> String {
        let (input, generation) = self.reset(raw);
        if input.chars().count() < Username::MIN_LENGTH {
            return input;
        }

        let inner = Arc::downgrade(&self.inner);
        let debounce = self.inner.debounce;
        let query = input.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            run_probe(&inner, generation, &query).await;
        });

        let mut probe = lock(&self.inner.probe);
        if probe.generation == generation {
            probe.task = Some(task);
        } else {
            // Superseded between reset and spawn.
            task.abort();
        }
        input
    }

    /// Probe `raw` right away, skipping the debounce window.
    pub async fn check_now(&self, raw: &str) -> Availability {
        let (input, generation) = self.reset(raw);
        if input.chars().count() >= Username::MIN_LENGTH {
            run_probe(&Arc::downgrade(&self.inner), generation, &input).await;
        }
        self.status()
    }

    /// Make `raw` the current input and invalidate everything before it.
    fn reset(&self, raw: &str) -> (String, u64) {
        let input = Username::normalize(raw);
        let mut probe = lock(&self.inner.probe);
        probe.generation += 1;
        probe.input.clone_from(&input);
        if let Some(task) = probe.task.take() {
            task.abort();
        }
        self.inner.status.send_replace(Availability::Idle);
        (input, probe.generation)
    }
}

#[instrument(skip(inner, generation))]
async fn run_probe<S: SearchIndex>(inner: &Weak<ProberInner<S>>, generation: u64, query: &str) {
    let Some(prober) = inner.upgrade() else {
        return;
    };
    if !apply(&prober, generation, query, Availability::Checking) {
        return;
    }
    let search = Arc::clone(&prober.search);
    let index = prober.index.clone();
    drop(prober);

    let result = search.search(&index, query).await;

    let Some(prober) = inner.upgrade() else {
        return;
    };
    let next = match result {
        Ok(hits) => classify(hits.first(), query),
        Err(e) => {
            warn!(error = %e, "Username probe failed");
            Availability::Idle
        }
    };
    if !apply(&prober, generation, query, next) {
        debug!(query, "Discarding superseded probe result");
    }
}

/// Set the status if `query` is still the current input.
fn apply<S>(inner: &ProberInner<S>, generation: u64, query: &str, next: Availability) -> bool {
    let probe = lock(&inner.probe);
    if probe.generation != generation || probe.input != query {
        return false;
    }
    inner.status.send_replace(next);
    true
}

fn classify(top: Option<&SearchHit>, query: &str) -> Availability {
    let taken = top
        .and_then(|hit| hit.attribute(USERNAME_ATTRIBUTE))
        .is_some_and(|name| name.eq_ignore_ascii_case(query));
    if taken {
        Availability::Taken
    } else {
        Availability::Available
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeSearchIndex;

    const INDEX: &str = "Users";
    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn prober(search: &Arc<FakeSearchIndex>) -> AvailabilityProber<FakeSearchIndex> {
        AvailabilityProber::new(Arc::clone(search), INDEX, DEBOUNCE)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_input_in_window_is_probed() {
        let search = Arc::new(FakeSearchIndex::new());
        let prober = prober(&search);

        prober.input_changed("ab");
        advance(100).await;
        prober.input_changed("abc");
        advance(100).await;
        prober.input_changed("abcd");
        advance(1_000).await;

        assert_eq!(search.queries(), vec!["abcd".to_owned()]);
        assert_eq!(prober.status(), Availability::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stale_probe_is_discarded() {
        let search = Arc::new(FakeSearchIndex::new());
        search.add_username(INDEX, "abc");
        search.set_latency("abc", Duration::from_secs(2));
        let prober = prober(&search);

        prober.input_changed("abc");
        advance(600).await;
        assert_eq!(prober.status(), Availability::Checking);

        prober.input_changed("abcd");
        assert_eq!(prober.status(), Availability::Idle);
        advance(600).await;
        assert_eq!(prober.status(), Availability::Available);

        // Well past the moment the "abc" probe would have answered `Taken`.
        advance(3_000).await;
        assert_eq!(prober.status(), Availability::Available);
        assert_eq!(prober.current_input(), "abcd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_stays_idle_without_probe() {
        let search = Arc::new(FakeSearchIndex::new());
        let prober = prober(&search);

        assert_eq!(prober.input_changed("A_b"), "ab");
        advance(1_000).await;

        assert_eq!(prober.status(), Availability::Idle);
        assert!(search.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_match_is_taken_case_insensitively() {
        let search = Arc::new(FakeSearchIndex::new());
        search.add_username(INDEX, "TrailRunner");
        let prober = prober(&search);

        assert_eq!(prober.input_changed("Trail_Runner"), "trailrunner");
        advance(600).await;

        assert_eq!(prober.status(), Availability::Taken);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefix_match_is_available() {
        let search = Arc::new(FakeSearchIndex::new());
        search.add_username(INDEX, "abcde");
        let prober = prober(&search);

        prober.input_changed("abcd");
        advance(600).await;

        assert_eq!(prober.status(), Availability::Available);
        assert!(prober.is_available_for(&Username::parse("abcd").unwrap()));
        assert!(!prober.is_available_for(&Username::parse("abcde").unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_failure_resets_to_idle() {
        let search = Arc::new(FakeSearchIndex::new());
        search.fail(true);
        let prober = prober(&search);

        prober.input_changed("abcd");
        advance(600).await;

        assert_eq!(prober.status(), Availability::Idle);
        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_change_invalidates_result_immediately() {
        let search = Arc::new(FakeSearchIndex::new());
        let prober = prober(&search);
        prober.input_changed("abcd");
        advance(600).await;
        assert_eq!(prober.status(), Availability::Available);

        prober.input_changed("abcde");

        assert_eq!(prober.status(), Availability::Idle);
        assert!(!prober.is_available_for(&Username::parse("abcd").unwrap()));
    }

    #[tokio::test]
    async fn test_check_now_skips_debounce() {
        let search = Arc::new(FakeSearchIndex::new());
        search.add_username(INDEX, "taken");
        let prober = prober(&search);

        assert_eq!(prober.check_now("Taken").await, Availability::Taken);
        assert_eq!(prober.check_now("free1").await, Availability::Available);
        assert_eq!(prober.check_now("no").await, Availability::Idle);
    }
}
