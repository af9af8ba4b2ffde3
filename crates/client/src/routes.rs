//! Navigation targets produced by the auth flows.

use core::fmt;

/// A view the front end should navigate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Entry view; unauthenticated users land here.
    Home,
    /// Return path embedded in sign-in links.
    SignIn,
    /// Account provisioning, optionally with the email pre-filled.
    Signup { email: Option<String> },
    /// Authenticated area.
    Trips,
}

impl Route {
    /// Path of the sign-in return URL.
    pub const SIGN_IN_PATH: &'static str = "/signin";

    /// Path (with query) of this route.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".to_owned(),
            Self::SignIn => Self::SIGN_IN_PATH.to_owned(),
            Self::Signup { email: None } => "/signup".to_owned(),
            Self::Signup { email: Some(email) } => {
                format!("/signup?email={}", urlencoding::encode(email))
            }
            Self::Trips => "/trips".to_owned(),
        }
    }

    /// Whether the view needs a signed-in session.
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        matches!(self, Self::Trips)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(Route::Home.path(), "/");
        assert_eq!(Route::SignIn.path(), "/signin");
        assert_eq!(Route::Trips.path(), "/trips");
        assert_eq!(Route::Signup { email: None }.path(), "/signup");
        assert_eq!(
            Route::Signup {
                email: Some("a+b@example.com".to_owned())
            }
            .path(),
            "/signup?email=a%2Bb%40example.com"
        );
    }

    #[test]
    fn test_only_trips_is_protected() {
        assert!(Route::Trips.is_protected());
        assert!(!Route::Home.is_protected());
        assert!(!Route::SignIn.is_protected());
    }
}
