//! Browser-side half of the tandem signaling protocol.
//!
//! [`SignalingClient`] joins one room on a tandem server, forwards
//! offers, answers and ICE candidates between the caller's peer connection
//! and the remote peer, and reconnects with linear backoff when the channel
//! drops for a non-terminal reason. It must be created inside a tokio
//! runtime.

pub mod client;
pub mod error;
pub mod handlers;
pub mod machine;

pub use client::{ClientConfig, SignalingClient};
pub use error::ClientError;
pub use handlers::SignalingHandlers;
pub use machine::ConnectionState;
