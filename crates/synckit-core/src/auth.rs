//! Token payload and permission checks.
//!
//! Token issuance and signature verification live outside the core; the
//! server receives an already-decoded [`TokenPayload`] from its auth
//! collaborator. Access checks are
//! `is_admin OR doc in list OR "*" in list`.
//!
//! # Examples
//!
//! ```
//! use synckit_core::auth::Permissions;
//! use synckit_core::ids::DocumentId;
//!
//! let perms = Permissions {
//!     can_read: vec!["*".to_string()],
//!     can_write: vec!["notes".to_string()],
//!     is_admin: false,
//! };
//! assert!(perms.allows_read(&DocumentId::from("anything")));
//! assert!(perms.allows_write(&DocumentId::from("notes")));
//! assert!(!perms.allows_write(&DocumentId::from("other")));
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::PERMISSION_WILDCARD;
use crate::ids::DocumentId;

/// Per-user document access lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    /// Documents readable by this user; may contain `"*"`.
    pub can_read: Vec<String>,
    /// Documents writable by this user; may contain `"*"`.
    pub can_write: Vec<String>,
    /// Admins bypass both lists.
    pub is_admin: bool,
}

impl Permissions {
    /// Full access, used for server-internal replicas and pub/sub peers.
    pub fn admin() -> Self {
        Self {
            can_read: Vec::new(),
            can_write: Vec::new(),
            is_admin: true,
        }
    }

    pub fn allows_read(&self, doc_id: &DocumentId) -> bool {
        self.is_admin || Self::list_allows(&self.can_read, doc_id)
    }

    pub fn allows_write(&self, doc_id: &DocumentId) -> bool {
        self.is_admin || Self::list_allows(&self.can_write, doc_id)
    }

    fn list_allows(list: &[String], doc_id: &DocumentId) -> bool {
        list.iter()
            .any(|entry| entry == PERMISSION_WILDCARD || entry == doc_id.as_str())
    }
}

/// Decoded auth token payload as handed to the server by its auth
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub user_id: String,
    pub permissions: Permissions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_bypasses_lists() {
        let perms = Permissions::admin();
        assert!(perms.allows_read(&DocumentId::from("any")));
        assert!(perms.allows_write(&DocumentId::from("any")));
    }

    #[test]
    fn explicit_grant_is_per_document() {
        let perms = Permissions {
            can_read: vec!["a".into()],
            can_write: vec![],
            is_admin: false,
        };
        assert!(perms.allows_read(&DocumentId::from("a")));
        assert!(!perms.allows_read(&DocumentId::from("b")));
        assert!(!perms.allows_write(&DocumentId::from("a")));
    }

    #[test]
    fn token_payload_uses_camel_case_fields() {
        let json = r#"{"userId":"u1","permissions":{"canRead":["*"],"canWrite":[],"isAdmin":false}}"#;
        let token: TokenPayload = serde_json::from_str(json).unwrap();
        assert_eq!(token.user_id, "u1");
        assert!(token.permissions.allows_read(&DocumentId::from("x")));
    }
}
