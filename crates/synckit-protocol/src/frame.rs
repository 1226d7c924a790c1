//! Binary frame codec with JSON-text fallback.
//!
//! Layout: `[1 byte type][8 bytes BE timestamp ms][4 bytes BE payload
//! length][payload JSON]`. A handler may receive JSON text instead: when the
//! first byte is `{`, `[`, or whitespace, the whole buffer is one JSON-mode
//! message. Malformed frames are protocol violations and close the
//! connection.

use serde_json::Value;

use crate::message::{Message, MessageType};
use synckit_core::errors::ProtocolError;
use synckit_core::SyncResult;

/// Header bytes before the payload.
const HEADER_LEN: usize = 1 + 8 + 4;

/// A decoded frame: the message plus the sender's frame timestamp.
/// JSON-mode frames carry no timestamp and decode as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Message,
    pub timestamp_ms: u64,
}

/// Encode a message as a binary frame.
pub fn encode_frame(message: &Message, timestamp_ms: u64) -> SyncResult<Vec<u8>> {
    let payload = payload_bytes(message)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(message.message_type() as u8);
    frame.extend_from_slice(&timestamp_ms.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Encode a message as a JSON-mode frame (the type tag beside the payload
/// fields).
pub fn encode_json_frame(message: &Message) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| {
        ProtocolError::SchemaViolation {
            message: message.message_type().as_str().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Decode one frame, binary or JSON-mode.
pub fn decode_frame(bytes: &[u8]) -> SyncResult<Frame> {
    let first = *bytes.first().ok_or(ProtocolError::Truncated {
        needed: HEADER_LEN,
        available: 0,
    })?;

    if matches!(first, b'{' | b'[' | b' ' | b'\t' | b'\r' | b'\n') {
        let message: Message =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::SchemaViolation {
                message: "json-mode frame".to_string(),
                reason: e.to_string(),
            })?;
        return Ok(Frame {
            message,
            timestamp_ms: 0,
        });
    }

    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        }
        .into());
    }

    let message_type =
        MessageType::from_byte(first).ok_or(ProtocolError::UnknownMessageType(first))?;
    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&bytes[1..9]);
    let timestamp_ms = u64::from_be_bytes(ts_bytes);
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[9..13]);
    let declared = u32::from_be_bytes(len_bytes) as usize;
    let payload = &bytes[HEADER_LEN..];
    if declared != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        }
        .into());
    }

    let message = message_from_payload(message_type, payload)?;
    Ok(Frame {
        message,
        timestamp_ms,
    })
}

/// Serialize a message's payload fields (without the type tag).
fn payload_bytes(message: &Message) -> SyncResult<Vec<u8>> {
    let mut value = serde_json::to_value(message).map_err(|e| ProtocolError::SchemaViolation {
        message: message.message_type().as_str().to_string(),
        reason: e.to_string(),
    })?;
    if let Value::Object(map) = &mut value {
        map.remove("type");
    }
    serde_json::to_vec(&value).map_err(|e| {
        ProtocolError::SchemaViolation {
            message: message.message_type().as_str().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Parse a payload document under the type from the frame header.
fn message_from_payload(message_type: MessageType, payload: &[u8]) -> SyncResult<Message> {
    let schema_err = |reason: String| ProtocolError::SchemaViolation {
        message: message_type.as_str().to_string(),
        reason,
    };

    let mut value: Value = if payload.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(payload).map_err(|e| schema_err(e.to_string()))?
    };
    match &mut value {
        Value::Object(map) => {
            map.insert(
                "type".to_string(),
                Value::String(message_type.as_str().to_string()),
            );
        }
        _ => {
            return Err(schema_err("payload is not a JSON object".to_string()).into());
        }
    }
    serde_json::from_value(value)
        .map_err(|e| schema_err(e.to_string()).into())
}
