//! redb table definitions for the stateloom adapter.
//!
//! One table, `&str` keys (the adapter key, usually the store name) and
//! `&[u8]` values (the JSON-serialized state).

use redb::TableDefinition;

/// Serialized store state keyed by adapter key.
pub const STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("states");
