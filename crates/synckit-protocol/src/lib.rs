//! # synckit-protocol
//!
//! The wire protocol binding SyncKit clients and servers: a binary frame
//! format (`[1B type][8B BE timestamp][4B BE length][JSON payload]`) with a
//! JSON-text fallback, and the typed payload for every message.

pub mod frame;
pub mod link;
pub mod message;

pub use frame::{decode_frame, encode_frame, encode_json_frame, Frame};
pub use link::FramedLink;
pub use message::{
    AwarenessStatePayload, AwarenessUpdatePayload, DeltaBody, DeltaMessage, ErrorPayload,
    FieldMeta, Message, MessageType,
};
