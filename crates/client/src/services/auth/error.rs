//! Sign-in link error types.

use packup_core::{Email, EmailError};
use thiserror::Error;

use crate::providers::{IdentityError, StorageError};
use crate::routes::Route;

/// Why a link exchange failed, as far as the user is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    /// Used, expired or malformed. The user must request a new link.
    ExpiredOrInvalidLink,
    /// No account for the email. Continue with account provisioning.
    UnknownIdentity,
    /// Anything else. A retry with a new link may work.
    Other,
}

impl LinkFailure {
    /// Classify a provider error.
    #[must_use]
    pub const fn classify(err: &IdentityError) -> Self {
        match err {
            IdentityError::ExpiredOrInvalidLink => Self::ExpiredOrInvalidLink,
            IdentityError::UnknownIdentity => Self::UnknownIdentity,
            _ => Self::Other,
        }
    }

    /// Where to send the user after this failure.
    #[must_use]
    pub fn next_route(self, email: &Email) -> Route {
        match self {
            Self::UnknownIdentity => Route::Signup {
                email: Some(email.to_string()),
            },
            Self::ExpiredOrInvalidLink | Self::Other => Route::Home,
        }
    }
}

/// Errors from the credential link flow.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The entered email is malformed.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// The link was opened on a device with no pending sign-in and the user
    /// declined to re-enter their email.
    #[error("email confirmation required to finish signing in")]
    EmailConfirmationRequired,

    /// The provider rejected the link exchange.
    #[error("sign-in link exchange failed: {source}")]
    Exchange {
        failure: LinkFailure,
        email: Email,
        #[source]
        source: IdentityError,
    },

    /// The provider failed to send the link.
    #[error("identity provider error: {0}")]
    Provider(#[from] IdentityError),

    /// The pending sign-in could not be read or written.
    #[error("local storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LinkError {
    /// Failure class of an exchange error.
    #[must_use]
    pub const fn failure(&self) -> Option<LinkFailure> {
        match self {
            Self::Exchange { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    /// Where to navigate after this error, if anywhere.
    #[must_use]
    pub fn next_route(&self) -> Option<Route> {
        match self {
            Self::Exchange { failure, email, .. } => Some(failure.next_route(email)),
            Self::EmailConfirmationRequired => Some(Route::Home),
            _ => None,
        }
    }
}
