//! Request correlation tokens.
//!
//! A [`RequestId`] tags a request so its reply can be picked out among
//! interleaved traffic on the same connection. Ids are 8 bytes on the wire.
//!
//! Generation combines a random per-process seed (high 32 bits) with a
//! monotonic counter (low 32 bits): ids never repeat within a process, and
//! two processes collide only if their random seeds do.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// An 8-byte request correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Size of a request id on the wire.
    pub const WIRE_SIZE: usize = 8;

    /// Build a request id from a raw value.
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Wire encoding (big-endian, 8 bytes).
    pub const fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        self.0.to_be_bytes()
    }

    /// Decode from wire bytes.
    pub const fn from_bytes(bytes: [u8; Self::WIRE_SIZE]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Mints request ids for one endpoint.
///
/// Owned by the endpoint and used from the single event-loop thread only.
#[derive(Debug)]
pub struct RequestIdGenerator {
    seed: u64,
    next: Cell<u32>,
}

impl RequestIdGenerator {
    /// Create a generator with a fresh random seed.
    pub fn new() -> Self {
        Self {
            seed: (rand::random::<u32>() as u64) << 32,
            next: Cell::new(0),
        }
    }

    /// Mint the next request id.
    pub fn mint(&self) -> RequestId {
        let counter = self.next.get();
        self.next.set(counter.wrapping_add(1));
        RequestId(self.seed | counter as u64)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let id = RequestId::from_u64(0x0123_4567_89ab_cdef);
        assert_eq!(RequestId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn mint_never_repeats() {
        let generator = RequestIdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.mint()));
        }
    }

    #[test]
    fn mint_is_monotonic_in_low_bits() {
        let generator = RequestIdGenerator::new();
        let a = generator.mint().as_u64();
        let b = generator.mint().as_u64();
        assert_eq!((a & 0xffff_ffff) + 1, b & 0xffff_ffff);
        assert_eq!(a >> 32, b >> 32);
    }

    #[test]
    fn display_is_fixed_width_hex() {
        let id = RequestId::from_u64(0x2a);
        assert_eq!(id.to_string(), "000000000000002a");
    }
}
