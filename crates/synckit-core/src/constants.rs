/// SyncKit engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wildcard entry in a permission list granting access to every document.
pub const PERMISSION_WILDCARD: &str = "*";

/// Field name of the tombstone sentinel object.
pub const TOMBSTONE_FIELD: &str = "__deleted";

/// Default key suffix for the overwritten single-snapshot layout.
pub const SNAPSHOT_SUFFIX: &str = "snapshot";
