//! Connection-management control vocabulary.
//!
//! Control frames carry fixed literal payloads and are answered by the
//! receiving dispatcher (or relay) directly; application code never sees
//! them.

const CONFIRM_CONNECTION: &[u8] = b"confirm_connection";
const CONNECTION_CONFIRMED: &[u8] = b"connection_confirmed";
const CHECK_CONNECTION: &[u8] = b"check_connection";
const CONNECTION_ALIVE: &[u8] = b"connection_alive";

/// A control frame, classified from its literal payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Client asks the listener to confirm the new connection.
    ConnectionConfirm,
    /// Listener's answer to [`ControlFrame::ConnectionConfirm`].
    ConnectionConfirmed,
    /// Health probe.
    HealthCheck,
    /// Answer to a health probe.
    HealthAlive,
}

impl ControlFrame {
    /// The literal wire payload for this control frame.
    pub const fn payload(&self) -> &'static [u8] {
        match self {
            ControlFrame::ConnectionConfirm => CONFIRM_CONNECTION,
            ControlFrame::ConnectionConfirmed => CONNECTION_CONFIRMED,
            ControlFrame::HealthCheck => CHECK_CONNECTION,
            ControlFrame::HealthAlive => CONNECTION_ALIVE,
        }
    }

    /// Classify a payload as a control frame, if it matches one of the
    /// fixed literals.
    pub fn classify(payload: &[u8]) -> Option<Self> {
        match payload {
            CONFIRM_CONNECTION => Some(ControlFrame::ConnectionConfirm),
            CONNECTION_CONFIRMED => Some(ControlFrame::ConnectionConfirmed),
            CHECK_CONNECTION => Some(ControlFrame::HealthCheck),
            CONNECTION_ALIVE => Some(ControlFrame::HealthAlive),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_payloads() {
        for frame in [
            ControlFrame::ConnectionConfirm,
            ControlFrame::ConnectionConfirmed,
            ControlFrame::HealthCheck,
            ControlFrame::HealthAlive,
        ] {
            assert_eq!(ControlFrame::classify(frame.payload()), Some(frame));
        }
    }

    #[test]
    fn application_payload_is_not_control() {
        assert_eq!(ControlFrame::classify(b"{\"request\":\"GET_WP\"}"), None);
        assert_eq!(ControlFrame::classify(b""), None);
    }
}
