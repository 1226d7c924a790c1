/// Wire protocol errors. All of these close the connection with a
/// policy-violation status.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("payload length {declared} does not match frame ({actual} bytes)")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload violates schema for {message}: {reason}")]
    SchemaViolation { message: String, reason: String },

    #[error("heartbeat timed out after {timeout_ms} ms")]
    HeartbeatTimeout { timeout_ms: u64 },
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            ProtocolError::HeartbeatTimeout { .. } => "HEARTBEAT_TIMEOUT",
            _ => "PROTOCOL_VIOLATION",
        }
    }
}
