//! Test doubles for the gateway and identity provider
//!
//! Enabled for this crate's tests and, via the `testing` feature, for
//! downstream crates.

mod mock_auth;
mod mock_gateway;

pub use mock_auth::MockAuth;
pub use mock_gateway::{Call, MockGateway, ProcedureFn, Tables};
