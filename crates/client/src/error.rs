//! Unified error handling with Sentry integration.
//!
//! Every flow error converts into [`ClientError`]. Front ends show
//! [`ClientError::user_message`] as a transient notification and call
//! [`ClientError::report`] once, which sends server-side failures to Sentry.

use packup_core::{DisplayNameError, EmailError, UsernameError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::providers::{IdentityError, SearchError, StorageError, StoreError};
use crate::services::auth::{LinkError, LinkFailure};
use crate::services::cache::CacheError;
use crate::services::provisioning::ProvisioningError;
use crate::services::session::SessionError;

/// Application-level error type for the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("Invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("Invalid display name: {0}")]
    InvalidDisplayName(#[from] DisplayNameError),

    /// The username was not confirmed available before submission.
    #[error("Username not available: {0}")]
    UsernameUnavailable(String),

    #[error("Sign-in error: {0}")]
    Link(#[from] LinkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Document error: {0}")]
    Cache(#[from] CacheError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A protected operation ran without a session.
    #[error("Not signed in")]
    NotSignedIn,
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        Self::Cache(CacheError::from(err))
    }
}

impl ClientError {
    /// Whether the error is a field-level validation failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEmail(_)
                | Self::InvalidUsername(_)
                | Self::InvalidDisplayName(_)
                | Self::UsernameUnavailable(_)
                | Self::Link(LinkError::InvalidEmail(_))
        )
    }

    /// Whether the error goes to Sentry.
    ///
    /// Orphaned accounts are captured where they happen and are not
    /// reported twice.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Storage(_) | Self::Cache(_) | Self::Search(_) => true,
            Self::Provisioning(err) => !matches!(err, ProvisioningError::OrphanedAccount { .. }),
            Self::Link(LinkError::Exchange { failure, .. }) => {
                matches!(failure, LinkFailure::Other)
            }
            Self::Link(LinkError::Provider(_) | LinkError::Storage(_)) | Self::Identity(_) => true,
            _ => false,
        }
    }

    /// Capture the error to Sentry if it is reportable.
    pub fn report(&self) {
        if self.is_reportable() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Client error"
            );
        }
    }

    /// Message for the user. Internal details are not exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(_) => "The app is not configured correctly".to_string(),
            Self::InvalidEmail(_) | Self::Link(LinkError::InvalidEmail(_)) => {
                "Please enter a valid email address".to_string()
            }
            Self::InvalidUsername(err) => capitalize(&err.to_string()),
            Self::InvalidDisplayName(err) => capitalize(&err.to_string()),
            Self::UsernameUnavailable(username) => {
                format!("The username \"{username}\" is not available")
            }
            Self::Link(err) => link_message(err),
            Self::Provisioning(err) => match err {
                ProvisioningError::Identity(IdentityError::EmailAlreadyInUse) => {
                    "An account with this email already exists".to_string()
                }
                ProvisioningError::OrphanedAccount { .. } => {
                    "Your account was created but your profile could not be saved. Submit the form again with the same email to finish"
                        .to_string()
                }
                ProvisioningError::LinkDispatch(_) => {
                    "Your account was created but we could not email your sign-in link. Please request a new one"
                        .to_string()
                }
                _ => "Failed to create your account. Please try again".to_string(),
            },
            Self::NotSignedIn | Self::Session(_) => "Please sign in to continue".to_string(),
            Self::Cache(_) | Self::Search(_) | Self::Identity(_) => {
                "Something went wrong. Please try again".to_string()
            }
            Self::Storage(_) => "Could not access local storage".to_string(),
        }
    }
}

fn link_message(err: &LinkError) -> String {
    match err {
        LinkError::InvalidEmail(_) => "Please enter a valid email address".to_string(),
        LinkError::EmailConfirmationRequired => {
            "Please confirm your email to finish signing in".to_string()
        }
        LinkError::Exchange { failure, .. } => match failure {
            LinkFailure::ExpiredOrInvalidLink => {
                "This sign-in link is invalid or has expired. Please request a new one".to_string()
            }
            LinkFailure::UnknownIdentity => {
                "No account exists for this email. Please sign up".to_string()
            }
            LinkFailure::Other => "Failed to sign in. Please try again".to_string(),
        },
        LinkError::Provider(_) => "Failed to send the sign-in link. Please try again".to_string(),
        LinkError::Storage(_) => "Could not access local storage".to_string(),
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Result type alias for `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use packup_core::{Email, IdentityId, Username};

    use super::*;

    #[test]
    fn test_user_messages_hide_internals() {
        let err = ClientError::from(StoreError::Api {
            status: 500,
            message: "backend exploded at shard 7".to_string(),
        });
        assert_eq!(err.user_message(), "Something went wrong. Please try again");
        assert!(err.is_reportable());
    }

    #[test]
    fn test_validation_messages() {
        let err = ClientError::from(Username::parse("ab").unwrap_err());
        assert!(err.is_validation());
        assert_eq!(err.user_message(), "Username must be at least 3 characters");

        let err = ClientError::from(LinkError::from(Email::parse("nope").unwrap_err()));
        assert!(err.is_validation());
        assert_eq!(err.user_message(), "Please enter a valid email address");
    }

    #[test]
    fn test_link_failures_are_user_actionable() {
        let Ok(email) = Email::parse("ada@example.com") else {
            panic!("valid email");
        };
        let err = ClientError::from(LinkError::Exchange {
            failure: LinkFailure::ExpiredOrInvalidLink,
            email,
            source: IdentityError::ExpiredOrInvalidLink,
        });

        assert!(err.user_message().contains("request a new one"));
        assert!(!err.is_reportable());
    }

    #[test]
    fn test_orphaned_account_not_reported_twice() {
        let Ok(email) = Email::parse("ada@example.com") else {
            panic!("valid email");
        };
        let err = ClientError::from(ProvisioningError::OrphanedAccount {
            identity_id: IdentityId::new("uid-1"),
            email,
            source: CacheError::from(StoreError::PermissionDenied("rules".to_string())),
        });

        assert!(!err.is_reportable());
        assert!(err.user_message().contains("profile could not be saved"));
        assert!(err.user_message().contains("same email"));
    }
}
