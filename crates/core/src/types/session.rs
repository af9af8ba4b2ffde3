//! Authenticated identity and pending sign-in records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::IdentityId;

/// An account as reported by the identity provider.
///
/// Providers may omit the email or display name, so both are optional here;
/// [`Session::from`] keeps them optional as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: IdentityId,
    pub email: Option<Email>,
    pub display_name: Option<String>,
}

/// The locally held record that a user is currently authenticated.
///
/// Only the session observer produces sessions; everything else reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity_id: IdentityId,
    pub email: Option<Email>,
    pub display_name: Option<String>,
}

impl From<AuthUser> for Session {
    fn from(user: AuthUser) -> Self {
        Self {
            identity_id: user.uid,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

/// A sign-in link that was requested on this device and not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSignIn {
    pub email: Email,
    pub requested_at: DateTime<Utc>,
}

impl PendingSignIn {
    /// Record a link request made now.
    #[must_use]
    pub fn now(email: Email) -> Self {
        Self {
            email,
            requested_at: Utc::now(),
        }
    }
}
