//! Firebase Identity Toolkit client.
//!
//! Implements [`IdentityProvider`] over the REST API. The signed-in user and
//! its tokens are persisted in local storage under [`AUTH_USER_KEY`], so a
//! session survives restarts, and the current user is pushed through a
//! `watch` channel the session observer subscribes to.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use packup_core::{AuthUser, Email, IdentityId};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{parse_error, truncate};
use crate::config::FirebaseConfig;
use crate::providers::{IdentityError, IdentityProvider, LocalStorage, read_json, write_json};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Local storage key of the signed-in user.
pub const AUTH_USER_KEY: &str = "authUser";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the API omits `expiresIn`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Whether `url` is an email sign-in link.
///
/// A sign-in link carries `mode=signIn` and a non-empty `oobCode`, either in
/// its own query or in the query of a URL nested under `link` (what mail
/// clients and dynamic links wrap it in).
#[must_use]
pub fn is_sign_in_link(url: &Url) -> bool {
    oob_code(url).is_some()
}

/// The one-time code of a sign-in link.
fn oob_code(url: &Url) -> Option<String> {
    direct_oob_code(url).or_else(|| {
        url.query_pairs()
            .filter(|(key, _)| key == "link" || key == "deep_link_id")
            .find_map(|(_, nested)| Url::parse(&nested).ok())
            .and_then(|nested| direct_oob_code(&nested))
    })
}

fn direct_oob_code(url: &Url) -> Option<String> {
    let mut is_sign_in = false;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "mode" => is_sign_in = value == "signIn",
            "oobCode" if !value.is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.filter(|_| is_sign_in)
}

/// Map an error response to an [`IdentityError`].
fn classify_error(status: u16, body: &str) -> IdentityError {
    match parse_error(body) {
        Some((code, message)) => match code.as_str() {
            "INVALID_OOB_CODE" | "EXPIRED_OOB_CODE" => IdentityError::ExpiredOrInvalidLink,
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" | "INVALID_EMAIL" => {
                IdentityError::UnknownIdentity
            }
            "EMAIL_EXISTS" => IdentityError::EmailAlreadyInUse,
            "TOKEN_EXPIRED" | "USER_DISABLED" | "INVALID_REFRESH_TOKEN" => {
                IdentityError::NotSignedIn
            }
            _ => IdentityError::Provider { code, message },
        },
        None if status >= 500 => IdentityError::Unavailable(format!("HTTP {status}")),
        None => IdentityError::Provider {
            code: status.to_string(),
            message: truncate(body, 200),
        },
    }
}

// =============================================================================
// Persisted user
// =============================================================================

/// The signed-in user with its tokens, as persisted locally.
///
/// Implements `Debug` manually to redact the tokens.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    #[serde(flatten)]
    user: AuthUser,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for StoredUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredUser")
            .field("user", &self.user)
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl StoredUser {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

/// Expiry of a token issued at `now`. Missing, malformed or out-of-range
/// lifetimes fall back to the default.
fn expires_at(now: DateTime<Utc>, expires_in: Option<&str>) -> DateTime<Utc> {
    let after = |secs: i64| TimeDelta::try_seconds(secs).and_then(|d| now.checked_add_signed(d));
    expires_in
        .and_then(|s| s.parse().ok())
        .and_then(after)
        .or_else(|| after(DEFAULT_TOKEN_LIFETIME_SECS))
        .unwrap_or(now)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl SignInResponse {
    fn into_stored(self, now: DateTime<Utc>) -> StoredUser {
        StoredUser {
            user: AuthUser {
                uid: IdentityId::new(self.local_id),
                email: self.email.and_then(|email| Email::parse(&email).ok()),
                display_name: self.display_name.filter(|name| !name.is_empty()),
            },
            expires_at: expires_at(now, self.expires_in.as_deref()),
            id_token: self.id_token,
            refresh_token: self.refresh_token,
        }
    }
}

/// Secure token responses use snake case.
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct CreateAuthUriResponse {
    /// Absent when email enumeration protection is on.
    #[serde(default)]
    registered: Option<bool>,
}

// =============================================================================
// IdentityToolkitClient
// =============================================================================

/// Client for the Firebase Identity Toolkit and Secure Token APIs.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    inner: Arc<IdentityToolkitInner>,
}

struct IdentityToolkitInner {
    client: reqwest::Client,
    api_key: SecretString,
    storage: Arc<dyn LocalStorage>,
    current: watch::Sender<Option<AuthUser>>,
    /// Held across refreshes so concurrent callers refresh once.
    tokens: Mutex<Option<StoredUser>>,
}

impl IdentityToolkitClient {
    /// Create a client, restoring the user persisted in `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted user cannot be read.
    pub fn new(
        config: &FirebaseConfig,
        storage: Arc<dyn LocalStorage>,
    ) -> Result<Self, IdentityError> {
        let stored: Option<StoredUser> = read_json(&*storage, AUTH_USER_KEY)?;
        if let Some(stored) = &stored {
            debug!(identity_id = %stored.user.uid, "Restored persisted user");
        }
        let (current, _) = watch::channel(stored.as_ref().map(|s| s.user.clone()));

        Ok(Self {
            inner: Arc::new(IdentityToolkitInner {
                client: reqwest::Client::new(),
                api_key: config.api_key.clone(),
                storage,
                current,
                tokens: Mutex::new(stored),
            }),
        })
    }

    /// The signed-in user, without waiting.
    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.inner.current.borrow().clone()
    }

    /// A valid ID token for the signed-in user, refreshed if close to
    /// expiry. `None` when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotSignedIn`] if the refresh token was
    /// revoked (the user is signed out locally and observers see `None`),
    /// or the transport error.
    pub async fn id_token(&self) -> Result<Option<SecretString>, IdentityError> {
        let mut tokens = self.inner.tokens.lock().await;
        let Some(stored) = tokens.as_mut() else {
            return Ok(None);
        };
        if !stored.needs_refresh(Utc::now()) {
            return Ok(Some(SecretString::from(stored.id_token.clone())));
        }

        let url = format!("{SECURE_TOKEN_URL}?key={}", self.inner.api_key.expose_secret());
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": stored.refresh_token,
        });
        match self.post::<RefreshResponse>(url, &body).await {
            Ok(refreshed) => {
                stored.expires_at = expires_at(Utc::now(), refreshed.expires_in.as_deref());
                stored.id_token = refreshed.id_token;
                stored.refresh_token = refreshed.refresh_token;
                write_json(&*self.inner.storage, AUTH_USER_KEY, &*stored)?;
                debug!(identity_id = %stored.user.uid, "Refreshed ID token");
                Ok(Some(SecretString::from(stored.id_token.clone())))
            }
            Err(IdentityError::NotSignedIn) => {
                warn!(identity_id = %stored.user.uid, "Refresh token revoked, signing out");
                *tokens = None;
                self.inner.storage.remove(AUTH_USER_KEY)?;
                self.inner.current.send_replace(None);
                Err(IdentityError::NotSignedIn)
            }
            Err(e) => Err(e),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{IDENTITY_TOOLKIT_URL}/accounts:{method}?key={}",
            self.inner.api_key.expose_secret()
        )
    }

    /// POST a JSON body and decode the JSON answer.
    async fn post<T: DeserializeOwned>(&self, url: String, body: &Value) -> Result<T, IdentityError> {
        let response = self.inner.client.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = classify_error(status.as_u16(), &text);
            debug!(status = %status, error = %err, "Identity Toolkit request failed");
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| IdentityError::Provider {
            code: "INVALID_RESPONSE".to_string(),
            message: e.to_string(),
        })
    }

    /// Persist and publish a new sign-in.
    async fn sign_in_with(&self, response: SignInResponse) -> Result<AuthUser, IdentityError> {
        let stored = response.into_stored(Utc::now());
        let user = stored.user.clone();

        write_json(&*self.inner.storage, AUTH_USER_KEY, &stored)?;
        *self.inner.tokens.lock().await = Some(stored);
        self.inner.current.send_replace(Some(user.clone()));
        Ok(user)
    }
}

impl IdentityProvider for IdentityToolkitClient {
    #[instrument(skip_all, fields(domain = %email.domain()))]
    async fn request_sign_in_link(&self, email: &Email, return_url: &Url) -> Result<(), IdentityError> {
        let body = json!({
            "requestType": "EMAIL_SIGNIN",
            "email": email,
            "continueUrl": return_url.as_str(),
            "canHandleCodeInApp": true,
        });
        let _: Value = self.post(self.endpoint("sendOobCode"), &body).await?;
        info!("Sign-in link sent");
        Ok(())
    }

    fn is_valid_sign_in_link(&self, url: &Url) -> bool {
        is_sign_in_link(url)
    }

    #[instrument(skip_all)]
    async fn exchange_sign_in_link(&self, email: &Email, url: &Url) -> Result<AuthUser, IdentityError> {
        let code = oob_code(url).ok_or(IdentityError::ExpiredOrInvalidLink)?;

        // Signing in with a link would silently create the account, so look
        // the email up first. The link stays unused when it is unknown.
        let lookup: CreateAuthUriResponse = self
            .post(
                self.endpoint("createAuthUri"),
                &json!({ "identifier": email, "continueUri": url.as_str() }),
            )
            .await?;
        if lookup.registered == Some(false) {
            return Err(IdentityError::UnknownIdentity);
        }

        let response: SignInResponse = self
            .post(
                self.endpoint("signInWithEmailLink"),
                &json!({ "email": email, "oobCode": code }),
            )
            .await?;
        self.sign_in_with(response).await
    }

    #[instrument(skip_all, fields(domain = %email.domain()))]
    async fn create_identity(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthUser, IdentityError> {
        let body = json!({
            "email": email,
            "password": password.expose_secret(),
            "returnSecureToken": true,
        });
        let response: SignInResponse = self.post(self.endpoint("signUp"), &body).await?;
        self.sign_in_with(response).await
    }

    fn observe_session(&self) -> BoxStream<'static, Option<AuthUser>> {
        let mut rx = self.inner.current.subscribe();
        async_stream::stream! {
            let initial = rx.borrow_and_update().clone();
            yield initial;
            while rx.changed().await.is_ok() {
                let user = rx.borrow_and_update().clone();
                yield user;
            }
        }
        .boxed()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        *self.inner.tokens.lock().await = None;
        self.inner.storage.remove(AUTH_USER_KEY)?;
        self.inner.current.send_replace(None);
        info!("Signed out");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn config() -> FirebaseConfig {
        FirebaseConfig {
            api_key: SecretString::from("AIzaSyTestKey"),
            project_id: "packup-test".to_string(),
        }
    }

    fn stored_user(expires_at: DateTime<Utc>) -> StoredUser {
        StoredUser {
            user: AuthUser {
                uid: IdentityId::new("uid-1"),
                email: Some(Email::parse("ada@example.com").unwrap()),
                display_name: None,
            },
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_sign_in_link_detection() {
        let direct = Url::parse(
            "https://packup.example.net/signin?apiKey=k&mode=signIn&oobCode=abc&continueUrl=x",
        )
        .unwrap();
        assert!(is_sign_in_link(&direct));
        assert_eq!(oob_code(&direct).as_deref(), Some("abc"));

        let nested = Url::parse(&format!(
            "https://packup.page.link/?link={}",
            urlencoding::encode("https://packup.example.net/signin?mode=signIn&oobCode=xyz")
        ))
        .unwrap();
        assert_eq!(oob_code(&nested).as_deref(), Some("xyz"));

        for plain in [
            "https://packup.example.net/signin",
            "https://packup.example.net/signin?mode=resetPassword&oobCode=abc",
            "https://packup.example.net/signin?mode=signIn&oobCode=",
        ] {
            assert!(!is_sign_in_link(&Url::parse(plain).unwrap()), "{plain}");
        }
    }

    #[test]
    fn test_classify_error_codes() {
        let body = |message: &str| format!(r#"{{"error": {{"code": 400, "message": "{message}"}}}}"#);

        assert!(matches!(
            classify_error(400, &body("INVALID_OOB_CODE")),
            IdentityError::ExpiredOrInvalidLink
        ));
        assert!(matches!(
            classify_error(400, &body("EXPIRED_OOB_CODE")),
            IdentityError::ExpiredOrInvalidLink
        ));
        assert!(matches!(
            classify_error(400, &body("EMAIL_NOT_FOUND")),
            IdentityError::UnknownIdentity
        ));
        assert!(matches!(
            classify_error(400, &body("EMAIL_EXISTS")),
            IdentityError::EmailAlreadyInUse
        ));
        assert!(matches!(
            classify_error(400, &body("TOKEN_EXPIRED")),
            IdentityError::NotSignedIn
        ));
        let IdentityError::Provider { code, .. } =
            classify_error(400, &body("WEAK_PASSWORD : too short"))
        else {
            panic!("expected provider error");
        };
        assert_eq!(code, "WEAK_PASSWORD");
        assert!(matches!(
            classify_error(503, "upstream connect error"),
            IdentityError::Unavailable(_)
        ));
    }

    #[test]
    fn test_token_refresh_margin() {
        let now = Utc::now();
        assert!(!stored_user(now + TimeDelta::minutes(30)).needs_refresh(now));
        assert!(stored_user(now + TimeDelta::seconds(30)).needs_refresh(now));
        assert!(stored_user(now - TimeDelta::seconds(1)).needs_refresh(now));
    }

    #[test]
    fn test_token_expiry_falls_back_on_bad_lifetimes() {
        let now = Utc::now();
        let default = now + TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECS);

        assert_eq!(expires_at(now, Some("120")), now + TimeDelta::seconds(120));
        assert_eq!(expires_at(now, None), default);
        assert_eq!(expires_at(now, Some("soon")), default);
        assert_eq!(expires_at(now, Some(&i64::MAX.to_string())), default);
        assert_eq!(expires_at(now, Some("9223372036854775")), default);
    }

    #[test]
    fn test_stored_user_debug_redacts_tokens() {
        let debug = format!("{:?}", stored_user(Utc::now()));
        assert!(!debug.contains("id-token"));
        assert!(!debug.contains("refresh-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_persisted_user_is_restored_and_observed_first() {
        let storage = Arc::new(MemoryStorage::new());
        let valid = stored_user(Utc::now() + TimeDelta::hours(1));
        write_json(&*storage, AUTH_USER_KEY, &valid).unwrap();

        let client = IdentityToolkitClient::new(&config(), storage).unwrap();
        let mut session = client.observe_session();

        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first.uid.as_str(), "uid-1");
        assert_eq!(client.current_user(), Some(first));
        assert!(client.id_token().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_out_clears_storage_and_pushes_none() {
        let storage = Arc::new(MemoryStorage::new());
        write_json(&*storage, AUTH_USER_KEY, &stored_user(Utc::now())).unwrap();
        let client =
            IdentityToolkitClient::new(&config(), Arc::clone(&storage) as Arc<dyn LocalStorage>)
                .unwrap();
        let mut session = client.observe_session();
        assert!(session.next().await.unwrap().is_some());

        client.sign_out().await.unwrap();

        assert_eq!(session.next().await.unwrap(), None);
        assert!(storage.get(AUTH_USER_KEY).unwrap().is_none());
        assert!(client.id_token().await.unwrap().is_none());
    }

    #[test]
    fn test_sign_in_response_to_user() {
        let response: SignInResponse = serde_json::from_value(json!({
            "idToken": "t",
            "refreshToken": "r",
            "expiresIn": "3600",
            "localId": "uid-9",
            "email": "ada@example.com",
            "displayName": ""
        }))
        .unwrap();
        let now = Utc::now();

        let stored = response.into_stored(now);

        assert_eq!(stored.user.uid.as_str(), "uid-9");
        assert_eq!(stored.user.display_name, None);
        assert_eq!(stored.expires_at, now + TimeDelta::seconds(3600));
    }
}
