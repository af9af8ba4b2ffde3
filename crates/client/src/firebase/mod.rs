//! Firebase REST adapters.
//!
//! - [`auth`] - Identity Toolkit (email links, sign-up, token refresh)
//! - [`firestore`] - Firestore documents, structured queries and polling
//!   realtime channels
//!
//! Both talk plain JSON over `reqwest`; the Firestore typed value encoding is
//! handled by the `value` module.

pub mod auth;
pub mod firestore;
mod value;

pub use auth::{AUTH_USER_KEY, IdentityToolkitClient, is_sign_in_link};
pub use firestore::FirestoreClient;

use serde::Deserialize;

/// Error envelope shared by the Google REST APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// `(code, message)` of an error response body, if it has the usual shape.
///
/// Identity Toolkit puts the code at the start of `message`
/// (`"EMAIL_NOT_FOUND"`, `"WEAK_PASSWORD : ..."`); Firestore puts it in
/// `status` (`"PERMISSION_DENIED"`).
fn parse_error(body: &str) -> Option<(String, String)> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let ErrorBody { message, status } = envelope.error;
    let code = status.unwrap_or_else(|| {
        message
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_owned()
    });
    Some((code, message))
}

/// First `max` characters of a response body, for logs and error messages.
pub(crate) fn truncate(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_codes() {
        let body = r#"{"error": {"code": 400, "message": "WEAK_PASSWORD : Password should be at least 6 characters"}}"#;
        let (code, message) = parse_error(body).unwrap();
        assert_eq!(code, "WEAK_PASSWORD");
        assert!(message.starts_with("WEAK_PASSWORD"));

        let body = r#"{"error": {"code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED"}}"#;
        assert_eq!(parse_error(body).unwrap().0, "PERMISSION_DENIED");

        assert!(parse_error("<html>bad gateway</html>").is_none());
    }
}
