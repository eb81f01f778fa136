//! Process identities.
//!
//! Every process on the bus is addressed by an [`Identity`] of the form
//! `<module-name>_<instance-suffix>`. The suffix is minted once at startup
//! and the identity stays fixed for the process lifetime; it is used both as
//! the sender tag on outbound frames and as the address other processes use
//! to reach this one through a relay.

use serde::{Deserialize, Serialize};

/// A process-unique module identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Mint a fresh identity for the given module name.
    ///
    /// The instance suffix is a random 32-bit value, so two instances of the
    /// same module started on the same host get distinct identities without
    /// any shared state.
    pub fn mint(module_name: &str) -> Self {
        let suffix: u32 = rand::random();
        Self(format!("{}_{:08x}", module_name, suffix))
    }

    /// Build an identity from an existing string.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for an empty string.
    pub fn from_string(s: impl Into<String>) -> Result<Self, IdentityError> {
        let s = s.into();
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(s))
    }

    /// Parse an identity from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or non-UTF-8 input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let s = std::str::from_utf8(bytes).map_err(|_| IdentityError::InvalidUtf8)?;
        Self::from_string(s)
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error building an identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The identity string was empty.
    #[error("identity must not be empty")]
    Empty,
    /// The wire bytes were not valid UTF-8.
    #[error("identity bytes are not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_prefixes_module_name() {
        let id = Identity::mint("op_data");
        assert!(id.as_str().starts_with("op_data_"));
        assert_eq!(id.as_str().len(), "op_data_".len() + 8);
    }

    #[test]
    fn mint_is_unique_per_instance() {
        let a = Identity::mint("ui");
        let b = Identity::mint("ui");
        assert_ne!(a, b);
    }

    #[test]
    fn from_bytes_roundtrip() {
        let id = Identity::mint("vision");
        let parsed = Identity::from_bytes(id.as_bytes()).expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Identity::from_string(""), Err(IdentityError::Empty));
        assert_eq!(Identity::from_bytes(b""), Err(IdentityError::Empty));
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert_eq!(
            Identity::from_bytes(&[0xff, 0xfe]),
            Err(IdentityError::InvalidUtf8)
        );
    }

    #[test]
    fn serde_is_transparent() {
        let id = Identity::from_string("eva_00000001").expect("identity");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"eva_00000001\"");
        let back: Identity = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
