//! Hosted backend adapter
//!
//! Binds the gateway and auth traits to the HTTP/websocket client.

mod hosted;

pub use hosted::HostedBackend;
