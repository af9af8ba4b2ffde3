//! Passwordless sign-in through emailed links.
//!
//! # Flow
//!
//! ```text
//! Idle -> LinkRequested -> LinkPending -> Exchanging -> Authenticated
//!                                                   \-> ExchangeFailed
//! ```
//!
//! [`CredentialLinkFlow::request_link`] asks the provider to email a link
//! that returns to the app's sign-in URL and remembers the email on this
//! device. [`CredentialLinkFlow::complete_link`] runs on every app load: it
//! ignores URLs that are not sign-in links, recovers the email (asking the
//! user when the link was opened on another device) and exchanges the link
//! exactly once.

mod error;
pub mod password;

pub use error::{LinkError, LinkFailure};
pub use password::{DEFAULT_PASSWORD_LENGTH, PasswordError, generate_password};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use packup_core::{Email, PendingSignIn, Session};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::providers::{
    EmailPrompt, IdentityError, IdentityProvider, LocalStorage, read_json, write_json,
};
use crate::routes::Route;
use crate::telemetry::add_breadcrumb;

/// Local storage key of the pending sign-in.
pub const PENDING_SIGN_IN_KEY: &str = "emailForSignIn";

/// Message shown when the email has to be re-entered.
pub const CONFIRM_EMAIL_PROMPT: &str = "Please provide your email for confirmation";

/// Where the flow stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    /// The provider is sending the link.
    LinkRequested,
    /// The link was sent and the email stored locally.
    LinkPending { email: Email },
    Exchanging,
    Authenticated(Session),
    ExchangeFailed(LinkFailure),
}

/// A completed sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub session: Session,
    /// View to navigate to.
    pub redirect: Route,
}

/// The sign-in link state machine.
pub struct CredentialLinkFlow<I> {
    inner: Arc<FlowInner<I>>,
}

struct FlowInner<I> {
    identity: Arc<I>,
    storage: Arc<dyn LocalStorage>,
    return_url: Url,
    state: watch::Sender<LinkState>,
    /// Links already handed to the provider. Each is single-use.
    exchanged: Mutex<HashSet<String>>,
}

impl<I> Clone for CredentialLinkFlow<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: IdentityProvider> CredentialLinkFlow<I> {
    /// Create a flow whose links return to `return_url`.
    #[must_use]
    pub fn new(identity: Arc<I>, storage: Arc<dyn LocalStorage>, return_url: Url) -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            inner: Arc::new(FlowInner {
                identity,
                storage,
                return_url,
                state,
                exchanged: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// The sign-in requested on this device, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read.
    pub fn pending(&self) -> Result<Option<PendingSignIn>, LinkError> {
        Ok(read_json(&*self.inner.storage, PENDING_SIGN_IN_KEY)?)
    }

    fn transition(&self, next: LinkState) {
        debug!(state = ?next, "Link flow transition");
        self.inner.state.send_replace(next);
    }

    /// Email a sign-in link to `raw_email`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidEmail`] for malformed input (the flow stays
    /// idle), or the provider/storage error if the link could not be sent or
    /// remembered.
    #[instrument(skip(self, raw_email))]
    pub async fn request_link(&self, raw_email: &str) -> Result<Email, LinkError> {
        let email = Email::parse(raw_email)?;
        self.transition(LinkState::LinkRequested);

        if let Err(err) = self
            .inner
            .identity
            .request_sign_in_link(&email, &self.inner.return_url)
            .await
        {
            warn!(domain = %email.domain(), error = %err, "Failed to send sign-in link");
            self.transition(LinkState::Idle);
            return Err(err.into());
        }

        write_json(
            &*self.inner.storage,
            PENDING_SIGN_IN_KEY,
            &PendingSignIn::now(email.clone()),
        )?;
        add_breadcrumb(
            "auth",
            "Sign-in link requested",
            Some(&[("domain", email.domain())]),
        );
        info!(domain = %email.domain(), "Sign-in link sent");

        self.transition(LinkState::LinkPending {
            email: email.clone(),
        });
        Ok(email)
    }

    /// Complete sign-in if `url` is a sign-in link.
    ///
    /// Returns `Ok(None)` without side effects for any other URL. Without a
    /// pending sign-in on this device, `prompt` is asked for the email. The
    /// link is exchanged at most once per flow; opening it again fails with
    /// [`LinkFailure::ExpiredOrInvalidLink`] without contacting the provider.
    ///
    /// # Errors
    ///
    /// - [`LinkError::EmailConfirmationRequired`] if the user declined the
    ///   prompt
    /// - [`LinkError::InvalidEmail`] if the entered email is malformed
    /// - [`LinkError::Exchange`] if the provider rejected the link
    #[instrument(skip_all)]
    pub async fn complete_link<P>(&self, url: &Url, prompt: &P) -> Result<Option<LinkOutcome>, LinkError>
    where
        P: EmailPrompt + ?Sized,
    {
        if !self.inner.identity.is_valid_sign_in_link(url) {
            debug!("Not a sign-in link");
            return Ok(None);
        }

        let email = match self.pending()? {
            Some(pending) => pending.email,
            None => {
                debug!("No pending sign-in on this device, asking for email");
                let raw = prompt
                    .prompt_for_email(CONFIRM_EMAIL_PROMPT)
                    .ok_or(LinkError::EmailConfirmationRequired)?;
                Email::parse(&raw)?
            }
        };

        let first_attempt = self
            .inner
            .exchanged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.as_str().to_owned());
        if !first_attempt {
            warn!("Sign-in link already used");
            return Err(self.fail(email, IdentityError::ExpiredOrInvalidLink));
        }

        self.transition(LinkState::Exchanging);
        match self.inner.identity.exchange_sign_in_link(&email, url).await {
            Ok(user) => {
                // Non-fatal: the provider has already consumed the link.
                if let Err(err) = self.inner.storage.remove(PENDING_SIGN_IN_KEY) {
                    warn!(error = %err, "Failed to clear pending sign-in");
                }
                let session = Session::from(user);
                add_breadcrumb("auth", "Sign-in link exchanged", None);
                info!(identity_id = %session.identity_id, "Signed in with email link");

                self.transition(LinkState::Authenticated(session.clone()));
                Ok(Some(LinkOutcome {
                    session,
                    redirect: Route::Trips,
                }))
            }
            Err(err) => {
                warn!(error = %err, "Sign-in link exchange failed");
                Err(self.fail(email, err))
            }
        }
    }

    fn fail(&self, email: Email, source: IdentityError) -> LinkError {
        let failure = LinkFailure::classify(&source);
        self.transition(LinkState::ExchangeFailed(failure));
        LinkError::Exchange {
            failure,
            email,
            source,
        }
    }

    /// Return to `Idle` (e.g. after the user dismissed an error).
    pub fn reset(&self) {
        self.transition(LinkState::Idle);
    }
}
