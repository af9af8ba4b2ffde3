//! One-time passwords for account creation.
//!
//! The identity provider insists on a password when an account is created.
//! Users never see it; they sign in through emailed links only.

use rand::Rng;
use rand::distr::Alphanumeric;
use secrecy::SecretString;
use thiserror::Error;

/// Length used for provisioned accounts.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password length must be at least 1")]
    ZeroLength,
}

/// Generate a password of `length` characters from `[A-Za-z0-9]` using the
/// thread-local CSPRNG.
///
/// # Errors
///
/// Returns [`PasswordError::ZeroLength`] if `length` is 0.
pub fn generate_password(length: usize) -> Result<SecretString, PasswordError> {
    if length == 0 {
        return Err(PasswordError::ZeroLength);
    }
    let password: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    Ok(SecretString::from(password))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH).unwrap();
        let raw = password.expose_secret();

        assert_eq!(raw.len(), 16);
        assert!(raw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert_eq!(
            generate_password(0).map(|_| ()),
            Err(PasswordError::ZeroLength)
        );
    }

    #[test]
    fn test_passwords_differ() {
        let a = generate_password(32).unwrap();
        let b = generate_password(32).unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
