//! Payload serialization.
//!
//! The substrate transports payload bytes opaquely; the [`MessageCodec`]
//! trait defines how application values become those bytes. [`JsonCodec`]
//! is the default: textual, self-describing and ASCII-safe, so frames stay
//! human-diagnosable in logs and captures.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::Formatter;

/// Error type for codec operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to payload bytes.
    #[error("encode failed: {message}")]
    Encode {
        /// Details from the underlying serializer.
        message: String,
    },
    /// Failed to decode payload bytes to a value.
    #[error("decode failed: {message}")]
    Decode {
        /// Details from the underlying deserializer.
        message: String,
    },
}

/// Pluggable payload serialization format.
///
/// `Clone + 'static` so codec instances can be held by endpoints and moved
/// into spawned tasks.
pub trait MessageCodec: Clone + 'static {
    /// Encode a value to payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode payload bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if deserialization fails. A decode
    /// failure is fatal to that message only: the caller drops and logs it.
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// JSON formatter that escapes every non-ASCII character as `\uXXXX`
/// (surrogate pairs outside the BMP), so encoded payloads are pure ASCII
/// bytes.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            if start < index {
                writer.write_all(fragment[start..index].as_bytes())?;
            }
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + ch.len_utf8();
        }
        if start < fragment.len() {
            writer.write_all(fragment[start..].as_bytes())?;
        }
        Ok(())
    }
}

/// JSON codec backed by serde_json.
///
/// Encoded payloads contain only ASCII bytes; non-ASCII characters in
/// strings are emitted as `\uXXXX` escapes and restored on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::with_capacity(128);
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, AsciiFormatter);
        value
            .serialize(&mut serializer)
            .map_err(|e| CodecError::Encode {
                message: e.to_string(),
            })?;
        Ok(payload)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Waypoint {
        id: u64,
        name: String,
        coordinates: Vec<f64>,
    }

    #[test]
    fn roundtrip_struct() {
        let codec = JsonCodec;
        let wp = Waypoint {
            id: 3,
            name: "pick".to_string(),
            coordinates: vec![0.1, 0.2, 0.3],
        };
        let payload = codec.encode(&wp).expect("encode");
        let back: Waypoint = codec.decode(&payload).expect("decode");
        assert_eq!(back, wp);
    }

    #[test]
    fn roundtrip_heterogeneous_sequence() {
        // The original protocol ships tuples of mixed values.
        let codec = JsonCodec;
        let value = serde_json::json!(["GOTO_WP", 12, {"speed": 0.5}]);
        let payload = codec.encode(&value).expect("encode");
        let back: serde_json::Value = codec.decode(&payload).expect("decode");
        assert_eq!(back, value);
    }

    #[test]
    fn decode_failure_is_an_error_not_a_panic() {
        let codec = JsonCodec;
        let result: Result<Waypoint, _> = codec.decode(b"not json {");
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn output_is_ascii_safe() {
        let codec = JsonCodec;
        let payload = codec.encode(&"umlaut: \u{00fc}").expect("encode");
        assert!(payload.is_ascii(), "payload must be pure ASCII bytes");
        assert_eq!(payload, b"\"umlaut: \\u00fc\"");
        let back: String = codec.decode(&payload).expect("decode");
        assert_eq!(back, "umlaut: \u{00fc}");
    }

    #[test]
    fn non_bmp_characters_escape_as_surrogate_pairs() {
        let codec = JsonCodec;
        let payload = codec.encode(&"\u{1f916}").expect("encode");
        assert!(payload.is_ascii());
        assert_eq!(payload, b"\"\\ud83e\\udd16\"");
        let back: String = codec.decode(&payload).expect("decode");
        assert_eq!(back, "\u{1f916}");
    }

    #[test]
    fn ascii_escapes_apply_to_map_keys_too() {
        let codec = JsonCodec;
        let value = serde_json::json!({"gr\u{00fc}n": 1});
        let payload = codec.encode(&value).expect("encode");
        assert!(payload.is_ascii());
        let back: serde_json::Value = codec.decode(&payload).expect("decode");
        assert_eq!(back, value);
    }
}
