//! Username and display name types used by sign-up.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Username`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    /// Fewer than [`Username::MIN_LENGTH`] characters remain after normalisation.
    #[error("username must be at least {min} characters")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
    /// More than [`Username::MAX_LENGTH`] characters remain after normalisation.
    #[error("username must be less than {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// A globally unique, lowercase alphanumeric handle.
///
/// Raw input is normalised with [`Username::normalize`] (lowercased, every
/// character outside `[a-z0-9]` dropped) before the length checks, matching
/// what the sign-up field does to each keystroke.
///
/// ```
/// use packup_core::Username;
///
/// assert_eq!(Username::parse("Trail_Runner!").unwrap().as_str(), "trailrunner");
/// assert!(Username::parse("a-b").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Minimum length after normalisation.
    pub const MIN_LENGTH: usize = 3;
    /// Maximum length after normalisation.
    pub const MAX_LENGTH: usize = 30;

    /// Lowercase the input and strip every character outside `[a-z0-9]`.
    #[must_use]
    pub fn normalize(raw: &str) -> String {
        raw.chars()
            .flat_map(char::to_lowercase)
            .filter(char::is_ascii_alphanumeric)
            .collect()
    }

    /// Normalise and validate a username.
    ///
    /// # Errors
    ///
    /// Returns an error if the normalised value is shorter than 3 or longer
    /// than 30 characters.
    pub fn parse(raw: &str) -> Result<Self, UsernameError> {
        let normalized = Self::normalize(raw);
        let len = normalized.chars().count();
        if len < Self::MIN_LENGTH {
            return Err(UsernameError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        if len > Self::MAX_LENGTH {
            return Err(UsernameError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(normalized))
    }

    /// Returns the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when parsing a [`DisplayName`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayNameError {
    #[error("full name must be at least {min} characters")]
    TooShort { min: usize },
    #[error("full name must be at most {max} characters")]
    TooLong { max: usize },
}

/// A person's full name as shown on their profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
    /// Minimum length in characters.
    pub const MIN_LENGTH: usize = 3;
    /// Maximum length in characters.
    pub const MAX_LENGTH: usize = 100;

    /// Trim and validate a display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed name is not 3 to 100 characters long.
    pub fn parse(raw: &str) -> Result<Self, DisplayNameError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len < Self::MIN_LENGTH {
            return Err(DisplayNameError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        if len > Self::MAX_LENGTH {
            return Err(DisplayNameError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the display name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_strips() {
        assert_eq!(Username::normalize("Hello World_42!"), "helloworld42");
        assert_eq!(Username::normalize("ÄBC"), "bc");
        assert_eq!(Username::normalize(""), "");
    }

    #[test]
    fn test_parse_length_bounds() {
        assert_eq!(
            Username::parse("a_b"),
            Err(UsernameError::TooShort { min: 3 })
        );
        assert!(Username::parse("abc").is_ok());
        assert!(Username::parse(&"x".repeat(30)).is_ok());
        assert_eq!(
            Username::parse(&"x".repeat(31)),
            Err(UsernameError::TooLong { max: 30 })
        );
    }

    #[test]
    fn test_display_name_bounds() {
        assert!(DisplayName::parse("  Al ").is_err());
        assert_eq!(DisplayName::parse(" Ada L ").unwrap().as_str(), "Ada L");
        assert!(DisplayName::parse(&"n".repeat(101)).is_err());
    }
}
