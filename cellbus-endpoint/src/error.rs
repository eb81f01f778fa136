//! Endpoint error types.

use std::time::Duration;

use cellbus_core::{CodecError, RequestId, WireError};

/// Error type for endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Binding the inbound socket failed.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Establishing an outbound connection failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// The peer address as passed to registration.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection attempt did not complete within the connect
    /// window.
    #[error("connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The peer address as passed to registration.
        address: String,
        /// The connect window that elapsed.
        timeout: Duration,
    },

    /// The peer did not confirm the connection within the handshake window.
    #[error("no connection confirmation from {address} within {timeout:?}")]
    HandshakeTimeout {
        /// The peer address as passed to registration.
        address: String,
        /// The handshake window that elapsed.
        timeout: Duration,
    },

    /// The named peer was never registered on this endpoint.
    #[error("unknown peer: {address}")]
    UnknownPeer {
        /// The address the caller used.
        address: String,
    },

    /// No matching reply arrived within the caller's deadline.
    #[error("timed out waiting for reply from {address}")]
    Timeout {
        /// The peer address waited on.
        address: String,
        /// The correlation id waited for, if any.
        request_id: Option<RequestId>,
    },

    /// The peer's outbound queue is full; the message was not queued.
    /// Sends fail fast instead of blocking behind a stalled peer.
    #[error("send queue full for {address}")]
    QueueFull {
        /// The peer address.
        address: String,
    },

    /// The peer connection is gone; the endpoint keeps no buffered data
    /// for it.
    #[error("connection to {address} closed")]
    ConnectionClosed {
        /// The peer address.
        address: String,
    },

    /// Payload serialization failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Frame encoding or decoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result alias for endpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;
