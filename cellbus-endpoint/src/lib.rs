//! Named endpoints for the cellbus control-plane substrate.
//!
//! An [`Endpoint`] binds one inbound socket, registers outbound connections
//! to peers by address, and exchanges correlated request/reply messages
//! with them. Background tasks confirm incoming connections, answer health
//! probes and track per-peer [`LinkState`].
//!
//! Everything runs single-threaded: endpoints are built inside a
//! `tokio::task::LocalSet` and their plumbing uses local tasks.
//!
//! # Example
//!
//! ```no_run
//! use cellbus_endpoint::{Endpoint, EndpointConfig};
//!
//! # async fn demo() -> Result<(), cellbus_endpoint::EndpointError> {
//! let mut endpoint = Endpoint::bind(EndpointConfig::new("ui", 0)).await?;
//! endpoint.register_connection("127.0.0.1:5554").await?;
//! let id = endpoint.send("127.0.0.1:5554", &serde_json::json!({"request": "GET_ALL_WP_IDS"}))?;
//! let reply: serde_json::Value = endpoint
//!     .receive("127.0.0.1:5554", Some(id), Some(std::time::Duration::from_secs(1)))
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod config;
mod dispatch;
mod endpoint;
mod error;
mod health;

pub use cellbus_core::{
    Identity, JsonCodec, MessageCodec, RequestId, Shutdown, MODULE_ENV, PORT_ENV,
};
pub use config::EndpointConfig;
pub use dispatch::ServiceMessage;
pub use endpoint::Endpoint;
pub use error::{EndpointError, EndpointResult};
pub use health::LinkState;
