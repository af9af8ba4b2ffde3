//! Profile documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::IdentityId;
use super::username::{DisplayName, Username};

/// A user's public profile, stored in the `users` collection under the
/// identity id. Created exactly once, right after the identity itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: IdentityId,
    pub email: Email,
    pub display_name: String,
    pub username: String,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Profile {
    /// Collection profiles are stored in.
    pub const COLLECTION: &'static str = "users";

    /// A fresh profile with empty optional fields.
    #[must_use]
    pub fn new(
        uid: IdentityId,
        email: Email,
        display_name: &DisplayName,
        username: &Username,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uid,
            email,
            display_name: display_name.as_str().to_owned(),
            username: username.as_str().to_owned(),
            photo_url: String::new(),
            bio: String::new(),
            website: String::new(),
            location: String::new(),
            created_at: now,
            last_updated: now,
        }
    }
}
