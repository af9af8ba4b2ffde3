//! Core types for Packup.
//!
//! This module provides type-safe wrappers for the domain concepts shared by
//! the authentication flow and the document cache.

pub mod document;
pub mod email;
pub mod filter;
pub mod id;
pub mod profile;
pub mod session;
pub mod status;
pub mod trip;
pub mod username;

pub use document::Document;
pub use email::{Email, EmailError};
pub use filter::{Filter, FilterOp, FilterSet, QueryFingerprint};
pub use id::*;
pub use profile::Profile;
pub use session::{AuthUser, PendingSignIn, Session};
pub use status::TripMemberStatus;
pub use trip::{Season, Trip, TripMember};
pub use username::{DisplayName, DisplayNameError, Username, UsernameError};
