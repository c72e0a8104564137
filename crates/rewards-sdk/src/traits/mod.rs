//! Core traits for backend collaborators
//!
//! The SDK talks to the backend only through these seams, so the hosted
//! client and the in-memory test doubles are interchangeable.

mod auth;
mod gateway;

pub use auth::{AuthEvent, AuthProvider};
pub use gateway::{RemoteGateway, Subscription, SubscriptionGuard};
