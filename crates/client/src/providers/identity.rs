//! Identity provider interface.

use std::future::Future;

use futures::stream::BoxStream;
use packup_core::{AuthUser, Email};
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use super::StorageError;

/// Errors reported by the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The sign-in link was already used, has expired, or was never valid.
    #[error("sign-in link is expired, already used, or invalid")]
    ExpiredOrInvalidLink,

    /// No account exists for the email the link was exchanged with.
    #[error("no account exists for this email")]
    UnknownIdentity,

    /// Account creation hit an existing account.
    #[error("an account already exists for this email")]
    EmailAlreadyInUse,

    /// An operation needed a signed-in user.
    #[error("no user is signed in")]
    NotSignedIn,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error code we do not classify.
    #[error("identity provider error {code}: {message}")]
    Provider { code: String, message: String },

    /// The provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// Persisting the signed-in user failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The authentication service that issues and validates sign-in links and
/// owns the current user.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Send a single-use sign-in link to `email` that returns to `return_url`.
    fn request_sign_in_link(
        &self,
        email: &Email,
        return_url: &Url,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Whether `url` has the shape of a sign-in link issued by this provider.
    fn is_valid_sign_in_link(&self, url: &Url) -> bool;

    /// Exchange a sign-in link for a signed-in user.
    fn exchange_sign_in_link(
        &self,
        email: &Email,
        url: &Url,
    ) -> impl Future<Output = Result<AuthUser, IdentityError>> + Send;

    /// Create a password identity. The new user becomes the current user.
    fn create_identity(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> impl Future<Output = Result<AuthUser, IdentityError>> + Send;

    /// Stream of current-user changes, starting with the current value.
    fn observe_session(&self) -> BoxStream<'static, Option<AuthUser>>;

    /// Forget the current user; observers receive `None`.
    fn sign_out(&self) -> impl Future<Output = Result<(), IdentityError>> + Send;
}

/// Blocking interactive input used when a link is opened on a device that
/// has no pending sign-in stored.
pub trait EmailPrompt {
    /// Ask the user for their email. `None` means they declined.
    fn prompt_for_email(&self, message: &str) -> Option<String>;
}
