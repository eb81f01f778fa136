//! The cellbus relay: a standalone forwarder for addressed frames.
//!
//! Endpoints that cannot (or should not) connect to each other directly all
//! register with one relay and address frames to peer identities; the relay
//! learns identities from the frames it sees and forwards by destination.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod relay;

pub use relay::{Relay, RelayError, DEFAULT_PORT};
