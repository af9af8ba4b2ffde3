//! Flows and state built on top of the provider interfaces.

pub mod auth;
pub mod availability;
pub mod cache;
pub mod provisioning;
pub mod session;
pub mod trips;
