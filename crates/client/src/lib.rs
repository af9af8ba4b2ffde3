//! Packup client - passwordless sign-in and cached document sync.
//!
//! # Architecture
//!
//! - [`services::auth`] - email link sign-in (request, complete, single use)
//! - [`services::session`] - one provider subscription fanned out to
//!   subscribers and route guards
//! - [`services::cache`] - keyed document cache with fetch de-duplication,
//!   optimistic updates and realtime push
//! - [`services::availability`] - debounced username availability probe
//! - [`services::provisioning`] - account creation (identity + profile)
//!
//! External services sit behind the traits in [`providers`]. The REST
//! adapters in [`firebase`], [`algolia`] and [`storage`] implement them for
//! production; the `testing` module (feature `testing`) ships in-memory fakes.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod algolia;
pub mod config;
pub mod error;
pub mod firebase;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use routes::Route;
pub use state::PackupClient;
