//! redb table definitions for the resource store.

use redb::TableDefinition;

/// Resource documents keyed by `{group}/{version}/{resource}/{namespace}/{name}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Store bookkeeping (the revision counter).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key of the store-wide revision counter in [`META`].
pub const REVISION_KEY: &str = "revision";
