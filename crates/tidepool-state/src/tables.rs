//! redb table definitions for the tidepool state store.
//!
//! Values are JSON-serialized domain types stored as `&[u8]`.

use redb::TableDefinition;

/// Scaling policies keyed by node class.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Scaling activities keyed by the hyphenated request UUID.
pub const ACTIVITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("activities");
