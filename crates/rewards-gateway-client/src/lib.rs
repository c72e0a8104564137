//! Rust client for the hosted rewards backend
//!
//! Speaks the three dialects the backend exposes:
//! - REST tables and procedures under `/rest/v1`
//! - email/password auth under `/auth/v1`
//! - row change feeds over the `/realtime/v1/websocket` channel socket
//!
//! Every failure is classified once into an [`ErrorKind`] so callers can
//! decide between fallback and surfacing without inspecting messages.
//!
//! # Example
//!
//! ```rust,no_run
//! use rewards_gateway_client::{Credentials, GatewayClient, GatewayConfig, ErrorKind};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GatewayClient::new(GatewayConfig {
//!     base_url: "https://project.example.co".into(),
//!     anon_key: "public-anon-key".into(),
//!     ..Default::default()
//! })?;
//!
//! let session = client
//!     .sign_in_with_password(&Credentials::new("me@example.com", "hunter22!"))
//!     .await?;
//! client.set_access_token(Some(session.access_token.clone()));
//!
//! match client.call_procedure("claim_daily_points", &serde_json::json!({"p_user_id": session.user.id, "p_points": 5})).await {
//!     Ok(result) => println!("claimed: {}", result),
//!     Err(e) if e.kind() == ErrorKind::ProcedureMissing => println!("procedure not deployed"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod realtime;
pub mod types;

// Re-export main types
pub use client::GatewayClient;
pub use error::{ErrorKind, GatewayError, Result};
pub use realtime::{ChannelHandle, RealtimeClient};
pub use types::*;
