//! Newtype IDs for type-safe entity references.
//!
//! Remote identifiers are opaque strings assigned by the identity provider or
//! the document store. Use the `define_id!` macro to create wrappers that
//! prevent accidentally passing one kind of identifier where another is
//! expected.

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>`, `From<&str>` and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use packup_core::define_id;
/// define_id!(TripId);
/// define_id!(InviteId);
///
/// let trip = TripId::new("T1");
/// assert_eq!(trip.as_str(), "T1");
///
/// // These are different types, so this won't compile:
/// // let _: InviteId = trip;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Identity-provider user id (the `uid` of an account).
define_id!(IdentityId);
// Document id within a collection.
define_id!(DocumentId);

impl From<IdentityId> for DocumentId {
    fn from(id: IdentityId) -> Self {
        Self(id.0)
    }
}

impl From<&IdentityId> for DocumentId {
    fn from(id: &IdentityId) -> Self {
        Self(id.0.clone())
    }
}
