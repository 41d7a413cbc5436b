//! redb table definitions for the upwatch state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Monitored targets keyed by `{target_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Transition history keyed by `{target_id}:{at:020}:{seq:04}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Settings keyed by name (see [`crate::types::SETTING_NOTIFICATION_TEMPLATE`]).
pub const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
