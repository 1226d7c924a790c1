//! Protocol messages and their JSON payloads.
//!
//! Field names on the wire are camelCase and match the protocol table
//! exactly; the optional `meta` map on authoritative DELTA broadcasts is an
//! extension a peer may ignore.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use synckit_core::{ClientId, DocumentId, Permissions, ReplicaId};
use synckit_crdt::{OperationEnvelope, VectorClock};

/// Wire message type bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    Pong = 0x02,
    Auth = 0x10,
    AuthSuccess = 0x11,
    AuthError = 0x12,
    Subscribe = 0x20,
    Unsubscribe = 0x21,
    SyncRequest = 0x22,
    SyncResponse = 0x23,
    Delta = 0x30,
    DeltaBatch = 0x31,
    Ack = 0x32,
    AwarenessSubscribe = 0x40,
    AwarenessUpdate = 0x41,
    AwarenessState = 0x42,
    Error = 0xFF,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::Ping,
            0x02 => Self::Pong,
            0x10 => Self::Auth,
            0x11 => Self::AuthSuccess,
            0x12 => Self::AuthError,
            0x20 => Self::Subscribe,
            0x21 => Self::Unsubscribe,
            0x22 => Self::SyncRequest,
            0x23 => Self::SyncResponse,
            0x30 => Self::Delta,
            0x31 => Self::DeltaBatch,
            0x32 => Self::Ack,
            0x40 => Self::AwarenessSubscribe,
            0x41 => Self::AwarenessUpdate,
            0x42 => Self::AwarenessState,
            0xFF => Self::Error,
            _ => return None,
        })
    }

    /// The tag used in JSON-mode frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Auth => "AUTH",
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::AuthError => "AUTH_ERROR",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::SyncRequest => "SYNC_REQUEST",
            Self::SyncResponse => "SYNC_RESPONSE",
            Self::Delta => "DELTA",
            Self::DeltaBatch => "DELTA_BATCH",
            Self::Ack => "ACK",
            Self::AwarenessSubscribe => "AWARENESS_SUBSCRIBE",
            Self::AwarenessUpdate => "AWARENESS_UPDATE",
            Self::AwarenessState => "AWARENESS_STATE",
            Self::Error => "ERROR",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "PING" => Self::Ping,
            "PONG" => Self::Pong,
            "AUTH" => Self::Auth,
            "AUTH_SUCCESS" => Self::AuthSuccess,
            "AUTH_ERROR" => Self::AuthError,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SYNC_REQUEST" => Self::SyncRequest,
            "SYNC_RESPONSE" => Self::SyncResponse,
            "DELTA" => Self::Delta,
            "DELTA_BATCH" => Self::DeltaBatch,
            "ACK" => Self::Ack,
            "AWARENESS_SUBSCRIBE" => Self::AwarenessSubscribe,
            "AWARENESS_UPDATE" => Self::AwarenessUpdate,
            "AWARENESS_STATE" => Self::AwarenessState,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }
}

/// The body of a DELTA: a field map for LWW documents, or a list of
/// enveloped operations for text/counter/set documents. The two shapes are
/// distinguishable on the wire (object vs array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaBody {
    Fields(BTreeMap<String, Value>),
    Ops(Vec<OperationEnvelope>),
}

/// Winning register metadata attached to authoritative broadcasts so
/// subscribers keep their local `(clock, writer)` pairs coherent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub clock: u64,
    pub writer: ReplicaId,
}

/// One DELTA message. Client→server carries submitted values; server→client
/// carries RESOLVED values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMessage {
    /// Message id for ACK tracking.
    pub id: String,
    pub doc_id: DocumentId,
    pub delta: DeltaBody,
    pub vector_clock: VectorClock,
    /// The writing replica. Required on every DELTA.
    pub writer: ReplicaId,
    /// The writer's logical clock for field-map deltas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_clock: Option<u64>,
    /// Authoritative broadcasts: per-field winning register metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, FieldMeta>>,
}

/// AWARENESS_UPDATE payload: a client publishing its own ephemeral state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUpdatePayload {
    pub doc_id: DocumentId,
    /// `null` announces departure.
    pub state: Value,
    pub clock: u64,
}

/// AWARENESS_STATE payload: the server fanning a client's state out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessStatePayload {
    pub doc_id: DocumentId,
    pub client_id: ClientId,
    pub state: Value,
    pub clock: u64,
}

/// ERROR payload with a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Every protocol message with its typed payload.
///
/// The serde representation is the JSON-mode frame: the message type tag
/// beside the payload fields. Binary frames strip the tag and carry it as
/// the type byte instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    Ping,
    Pong,
    Auth {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
    AuthSuccess {
        user_id: String,
        permissions: Permissions,
    },
    AuthError {
        error: String,
        code: String,
    },
    Subscribe {
        doc_id: DocumentId,
    },
    Unsubscribe {
        doc_id: DocumentId,
    },
    SyncRequest {
        doc_id: DocumentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_vector_clock: Option<VectorClock>,
    },
    SyncResponse {
        doc_id: DocumentId,
        state: Value,
        vector_clock: VectorClock,
    },
    Delta(DeltaMessage),
    DeltaBatch {
        doc_id: DocumentId,
        deltas: Vec<DeltaMessage>,
    },
    Ack {
        message_id: String,
    },
    AwarenessSubscribe {
        doc_id: DocumentId,
    },
    AwarenessUpdate(AwarenessUpdatePayload),
    AwarenessState(AwarenessStatePayload),
    Error(ErrorPayload),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
            Message::Auth { .. } => MessageType::Auth,
            Message::AuthSuccess { .. } => MessageType::AuthSuccess,
            Message::AuthError { .. } => MessageType::AuthError,
            Message::Subscribe { .. } => MessageType::Subscribe,
            Message::Unsubscribe { .. } => MessageType::Unsubscribe,
            Message::SyncRequest { .. } => MessageType::SyncRequest,
            Message::SyncResponse { .. } => MessageType::SyncResponse,
            Message::Delta(_) => MessageType::Delta,
            Message::DeltaBatch { .. } => MessageType::DeltaBatch,
            Message::Ack { .. } => MessageType::Ack,
            Message::AwarenessSubscribe { .. } => MessageType::AwarenessSubscribe,
            Message::AwarenessUpdate(_) => MessageType::AwarenessUpdate,
            Message::AwarenessState(_) => MessageType::AwarenessState,
            Message::Error(_) => MessageType::Error,
        }
    }

    /// Build an ERROR message from anything carrying a stable code.
    pub fn error(error: impl Into<String>, code: impl Into<String>) -> Self {
        Message::Error(ErrorPayload {
            error: error.into(),
            code: code.into(),
            details: None,
        })
    }

    /// Mint a DELTA message id.
    pub fn new_message_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
