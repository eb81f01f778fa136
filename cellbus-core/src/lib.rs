//! # cellbus-core
//!
//! Core types and wire format for the cellbus messaging substrate.
//!
//! This crate provides everything the endpoint and relay share:
//!
//! - **Identity**: process-unique module identities (`<module>_<suffix>`)
//! - **Wire format**: checksummed byte frames with addressing and
//!   request-correlation segments
//! - **Control vocabulary**: the fixed handshake and health-probe payloads
//! - **Request ids**: collision-free 8-byte correlation tokens
//! - **Codec**: pluggable payload serialization with a JSON default
//! - **Configuration**: environment-driven module configuration

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod config;
mod control;
mod identity;
mod request_id;
mod shutdown;
mod wire;

/// Consumer request/response vocabulary transported over the substrate.
pub mod vocab;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::{ConfigError, ModuleConfig, MODULE_ENV, PORT_ENV};
pub use control::ControlFrame;
pub use identity::{Identity, IdentityError};
pub use request_id::{RequestId, RequestIdGenerator};
pub use shutdown::{wait_for_signals, Shutdown};
pub use wire::{
    encode_frame, try_decode_frame, Frame, WireError, FRAME_PREFIX_SIZE, MAX_PAYLOAD_SIZE,
};
