//! Wire format for bus frames.
//!
//! Frame layout:
//!
//! ```text
//! [length:4][checksum:4][flags:1]
//! [sender_len:2][sender]          if flags & SENDER
//! [dest_len:2][destination]       if flags & DESTINATION
//! [request_id:8]                  if flags & REQUEST_ID
//! [payload:N]
//! ```
//!
//! - **length**: total frame size including this prefix (little-endian u32)
//! - **checksum**: CRC32C over everything after the checksum field
//! - **sender**: identity of the sending process; present on server-bound
//!   and relay-addressed frames, omitted on replies (implicit from the
//!   connection)
//! - **destination**: present only on relay-addressed frames
//! - **request_id**: present only when the payload is part of a correlated
//!   exchange
//!
//! Frames travel over a byte stream, so [`try_decode_frame`] parses
//! incrementally and returns `None` until a full frame is buffered.

use crate::control::ControlFrame;
use crate::identity::{Identity, IdentityError};
use crate::request_id::RequestId;

/// Size of the fixed `[length][checksum]` prefix.
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Maximum payload size (1 MiB). Larger frames are rejected on both ends.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Upper bound on a whole frame, used to reject absurd length fields before
/// buffering.
const MAX_FRAME_SIZE: usize =
    FRAME_PREFIX_SIZE + 1 + 2 * (2 + u16::MAX as usize) + RequestId::WIRE_SIZE + MAX_PAYLOAD_SIZE;

const FLAG_SENDER: u8 = 0b0000_0001;
const FLAG_DESTINATION: u8 = 0b0000_0010;
const FLAG_REQUEST_ID: u8 = 0b0000_0100;
const KNOWN_FLAGS: u8 = FLAG_SENDER | FLAG_DESTINATION | FLAG_REQUEST_ID;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
    },

    /// An identity does not fit the 16-bit length field.
    #[error("address too long: {len} bytes")]
    AddressTooLong {
        /// Actual address length in bytes.
        len: usize,
    },

    /// Checksum verification failed; the frame was corrupted in transit.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum from the frame prefix.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// The length field is out of bounds.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The offending length value.
        length: u32,
    },

    /// A variable-length segment extends past the frame end, or an unknown
    /// flag bit is set.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// What went wrong.
        reason: &'static str,
    },

    /// An address segment is not a valid identity.
    #[error("invalid address in frame")]
    InvalidAddress(#[from] IdentityError),
}

/// A decoded bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Identity of the sending process, when carried on the wire.
    pub sender: Option<Identity>,
    /// Destination identity for relay-addressed frames.
    pub destination: Option<Identity>,
    /// Correlation token for request/response exchanges.
    pub request_id: Option<RequestId>,
    /// Opaque application payload (or a control literal).
    pub payload: Vec<u8>,
}

impl Frame {
    /// A server-bound application frame.
    pub fn application(sender: Identity, request_id: Option<RequestId>, payload: Vec<u8>) -> Self {
        Self {
            sender: Some(sender),
            destination: None,
            request_id,
            payload,
        }
    }

    /// A client-bound reply. The sender is implicit from the connection.
    pub fn reply(request_id: Option<RequestId>, payload: Vec<u8>) -> Self {
        Self {
            sender: None,
            destination: None,
            request_id,
            payload,
        }
    }

    /// A relay-addressed frame carrying both sender and destination.
    pub fn routed(
        sender: Identity,
        destination: Identity,
        request_id: Option<RequestId>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sender: Some(sender),
            destination: Some(destination),
            request_id,
            payload,
        }
    }

    /// A control frame with the given literal payload.
    pub fn control(sender: Option<Identity>, control: ControlFrame) -> Self {
        Self {
            sender,
            destination: None,
            request_id: None,
            payload: control.payload().to_vec(),
        }
    }

    /// Classify this frame's payload as a control frame, if it is one.
    pub fn as_control(&self) -> Option<ControlFrame> {
        ControlFrame::classify(&self.payload)
    }
}

fn push_address(body: &mut Vec<u8>, address: &Identity) -> Result<(), WireError> {
    let bytes = address.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(WireError::AddressTooLong { len: bytes.len() });
    }
    body.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    body.extend_from_slice(bytes);
    Ok(())
}

/// Encode a frame into wire bytes.
///
/// # Errors
///
/// Returns an error if the payload exceeds [`MAX_PAYLOAD_SIZE`] or an
/// address does not fit its length field.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    if frame.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge {
            size: frame.payload.len(),
        });
    }

    let mut flags = 0u8;
    if frame.sender.is_some() {
        flags |= FLAG_SENDER;
    }
    if frame.destination.is_some() {
        flags |= FLAG_DESTINATION;
    }
    if frame.request_id.is_some() {
        flags |= FLAG_REQUEST_ID;
    }

    // Body is everything covered by the checksum.
    let mut body = Vec::with_capacity(1 + frame.payload.len() + 32);
    body.push(flags);
    if let Some(sender) = &frame.sender {
        push_address(&mut body, sender)?;
    }
    if let Some(destination) = &frame.destination {
        push_address(&mut body, destination)?;
    }
    if let Some(request_id) = frame.request_id {
        body.extend_from_slice(&request_id.to_bytes());
    }
    body.extend_from_slice(&frame.payload);

    let checksum = crc32c::crc32c(&body);
    let length = (FRAME_PREFIX_SIZE + body.len()) as u32;

    let mut data = Vec::with_capacity(length as usize);
    data.extend_from_slice(&length.to_le_bytes());
    data.extend_from_slice(&checksum.to_le_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

fn take_address<'a>(body: &'a [u8], offset: &mut usize) -> Result<&'a [u8], WireError> {
    if body.len() < *offset + 2 {
        return Err(WireError::Malformed {
            reason: "address length extends past frame end",
        });
    }
    let len = u16::from_le_bytes([body[*offset], body[*offset + 1]]) as usize;
    *offset += 2;
    if body.len() < *offset + len {
        return Err(WireError::Malformed {
            reason: "address extends past frame end",
        });
    }
    let bytes = &body[*offset..*offset + len];
    *offset += len;
    Ok(bytes)
}

/// Try to decode one frame from a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((frame, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more bytes are needed (not an error)
/// - `Err` if the buffered data is malformed; the connection cannot be
///   resynchronized after this and should be torn down
pub fn try_decode_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, WireError> {
    if data.len() < FRAME_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if (length as usize) < FRAME_PREFIX_SIZE + 1 || length as usize > MAX_FRAME_SIZE {
        return Err(WireError::InvalidLength { length });
    }
    if data.len() < length as usize {
        return Ok(None);
    }

    let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let body = &data[FRAME_PREFIX_SIZE..length as usize];
    let actual = crc32c::crc32c(body);
    if actual != expected {
        return Err(WireError::ChecksumMismatch { expected, actual });
    }

    let flags = body[0];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(WireError::Malformed {
            reason: "unknown flag bits set",
        });
    }

    let mut offset = 1usize;
    let sender = if flags & FLAG_SENDER != 0 {
        Some(Identity::from_bytes(take_address(body, &mut offset)?)?)
    } else {
        None
    };
    let destination = if flags & FLAG_DESTINATION != 0 {
        Some(Identity::from_bytes(take_address(body, &mut offset)?)?)
    } else {
        None
    };
    let request_id = if flags & FLAG_REQUEST_ID != 0 {
        if body.len() < offset + RequestId::WIRE_SIZE {
            return Err(WireError::Malformed {
                reason: "request id extends past frame end",
            });
        }
        let mut raw = [0u8; RequestId::WIRE_SIZE];
        raw.copy_from_slice(&body[offset..offset + RequestId::WIRE_SIZE]);
        offset += RequestId::WIRE_SIZE;
        Some(RequestId::from_bytes(raw))
    } else {
        None
    };

    let payload = body[offset..].to_vec();
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
        });
    }

    Ok(Some((
        Frame {
            sender,
            destination,
            request_id,
            payload,
        },
        length as usize,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> Identity {
        Identity::from_string(s).expect("identity")
    }

    #[test]
    fn application_frame_roundtrip() {
        let frame = Frame::application(
            identity("op_data_0000002a"),
            Some(RequestId::from_u64(7)),
            b"{\"request\":\"GET_ALL_WP_IDS\"}".to_vec(),
        );
        let data = encode_frame(&frame).expect("encode");
        let (decoded, consumed) = try_decode_frame(&data).expect("decode").expect("complete");
        assert_eq!(decoded, frame);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn reply_frame_omits_sender() {
        let frame = Frame::reply(Some(RequestId::from_u64(9)), b"[1,2,3]".to_vec());
        let data = encode_frame(&frame).expect("encode");
        let (decoded, _) = try_decode_frame(&data).expect("decode").expect("complete");
        assert_eq!(decoded.sender, None);
        assert_eq!(decoded.request_id, Some(RequestId::from_u64(9)));
        assert_eq!(decoded.payload, b"[1,2,3]");
    }

    #[test]
    fn routed_frame_carries_both_addresses() {
        let frame = Frame::routed(
            identity("ui_00000001"),
            identity("eva_00000002"),
            None,
            b"ping".to_vec(),
        );
        let data = encode_frame(&frame).expect("encode");
        let (decoded, _) = try_decode_frame(&data).expect("decode").expect("complete");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_frame_roundtrip() {
        let frame = Frame::control(Some(identity("ui_00000001")), ControlFrame::HealthCheck);
        let data = encode_frame(&frame).expect("encode");
        let (decoded, _) = try_decode_frame(&data).expect("decode").expect("complete");
        assert_eq!(decoded.as_control(), Some(ControlFrame::HealthCheck));
    }

    #[test]
    fn partial_data_needs_more() {
        let frame = Frame::application(identity("ui_00000001"), None, b"hello".to_vec());
        let data = encode_frame(&frame).expect("encode");
        assert_eq!(try_decode_frame(&data[..4]).expect("partial"), None);
        assert_eq!(
            try_decode_frame(&data[..data.len() - 1]).expect("partial"),
            None
        );
    }

    #[test]
    fn trailing_bytes_are_left_in_buffer() {
        let first = Frame::reply(None, b"one".to_vec());
        let second = Frame::reply(None, b"two".to_vec());
        let mut data = encode_frame(&first).expect("encode");
        let first_len = data.len();
        data.extend_from_slice(&encode_frame(&second).expect("encode"));

        let (decoded, consumed) = try_decode_frame(&data).expect("decode").expect("complete");
        assert_eq!(decoded.payload, b"one");
        assert_eq!(consumed, first_len);

        let (decoded, _) = try_decode_frame(&data[consumed..])
            .expect("decode")
            .expect("complete");
        assert_eq!(decoded.payload, b"two");
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let frame = Frame::reply(None, b"intact".to_vec());
        let mut data = encode_frame(&frame).expect("encode");
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(
            try_decode_frame(&data),
            Err(WireError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_length_is_detected() {
        let frame = Frame::reply(None, b"intact".to_vec());
        let mut data = encode_frame(&frame).expect("encode");
        data[0..4].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            try_decode_frame(&data),
            Err(WireError::InvalidLength { length: 3 })
        ));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let frame = Frame::reply(None, b"x".to_vec());
        let mut data = encode_frame(&frame).expect("encode");
        data[FRAME_PREFIX_SIZE] |= 0b1000_0000;
        // Checksum covers flags, so recompute to isolate the flag check.
        let checksum = crc32c::crc32c(&data[FRAME_PREFIX_SIZE..]);
        data[4..8].copy_from_slice(&checksum.to_le_bytes());
        assert!(matches!(
            try_decode_frame(&data),
            Err(WireError::Malformed { .. })
        ));
    }

    #[test]
    fn oversized_payload_is_rejected_at_encode() {
        let frame = Frame::reply(None, vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            encode_frame(&frame),
            Err(WireError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn empty_payload_frame() {
        let frame = Frame::application(identity("md_00000003"), None, Vec::new());
        let data = encode_frame(&frame).expect("encode");
        let (decoded, _) = try_decode_frame(&data).expect("decode").expect("complete");
        assert!(decoded.payload.is_empty());
    }
}
