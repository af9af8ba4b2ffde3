//! Subcommand implementations.

pub mod auth;
pub mod signup;
pub mod trips;

use packup_client::ClientError;
use thiserror::Error;

/// Errors a command can end with.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The argument is not a URL at all.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL parsed but is not a sign-in link.
    #[error("Not a sign-in link")]
    NotASignInLink,
}

impl CliError {
    /// Message for the terminal.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Client(err) => err.user_message(),
            Self::InvalidUrl(_) | Self::NotASignInLink => {
                "That is not a sign-in link. Copy the whole link from the email".to_string()
            }
        }
    }
}
