//! Opaque identifier newtypes.
//!
//! Replicas, documents, clients, and field paths are all addressed by opaque
//! strings. Namespacing inside a document id (e.g. `playground:text:block1`)
//! is visible only to [`DocumentId::kind_hint`].

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Globally unique id of a participating runtime (client session or
    /// server instance). Never reused across sessions.
    ReplicaId
}

string_id! {
    /// Opaque document identifier. May carry colon-separated namespace
    /// segments that hint at the document's CRDT kind.
    DocumentId
}

string_id! {
    /// Identity of a connected client as known to the server. Distinct from
    /// [`ReplicaId`]: several tabs (replicas) can share one client.
    ClientId
}

string_id! {
    /// Dotted path of a field inside an LWW document. Treated as an opaque
    /// key; no path traversal happens in the core.
    FieldPath
}

/// The CRDT kind a document id resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    /// Keyed last-write-wins register map (the default).
    Lww,
    /// Fugue sequence with a Peritext format layer.
    Text,
    /// PN-Counter.
    Counter,
    /// OR-Set.
    Set,
}

impl DocumentId {
    /// Resolve the CRDT kind from the id's namespace segments.
    ///
    /// A `text`, `counter`, or `set` segment anywhere in the colon-separated
    /// id selects that kind; everything else is an LWW document.
    pub fn kind_hint(&self) -> DocKind {
        for segment in self.0.split(':') {
            match segment {
                "text" => return DocKind::Text,
                "counter" => return DocKind::Counter,
                "set" => return DocKind::Set,
                _ => {}
            }
        }
        DocKind::Lww
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_hint_from_namespace_segment() {
        assert_eq!(DocumentId::from("playground:text:b1").kind_hint(), DocKind::Text);
        assert_eq!(DocumentId::from("counter:votes").kind_hint(), DocKind::Counter);
        assert_eq!(DocumentId::from("app:set:tags").kind_hint(), DocKind::Set);
        assert_eq!(DocumentId::from("profile").kind_hint(), DocKind::Lww);
        assert_eq!(DocumentId::from("context").kind_hint(), DocKind::Lww);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = DocumentId::from("playground:text:b1");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"playground:text:b1\""
        );
    }
}
