//! The tombstone sentinel.
//!
//! Deleted fields keep their register so deletions commute with concurrent
//! writes; the register's value becomes the JSON object `{"__deleted": true}`.
//! Any value shaped exactly that way is a tombstone — rendered state omits it.

use serde_json::{json, Value};

use synckit_core::constants::TOMBSTONE_FIELD;

/// Build the tombstone sentinel value.
pub fn tombstone() -> Value {
    json!({ TOMBSTONE_FIELD: true })
}

/// Whether a value is exactly the tombstone sentinel.
///
/// The shape must match exactly: one field, `__deleted`, set to `true`.
/// `{"__deleted": false}` or objects with extra fields are user values.
pub fn is_tombstone(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.get(TOMBSTONE_FIELD) == Some(&Value::Bool(true)),
        _ => false,
    }
}
