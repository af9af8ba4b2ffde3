//! Packup Core - Shared domain types.
//!
//! This crate provides the types shared by the Packup client library and its
//! command-line front end:
//! - validated user input (`Email`, `Username`, `DisplayName`)
//! - identity and session records (`Session`, `PendingSignIn`)
//! - remote documents (`Document`, `Profile`, `Trip`) and query filters
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no async runtime. Everything that talks to a remote service lives
//! in `packup-client`.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers, documents, filters and fingerprints

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
