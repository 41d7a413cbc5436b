//! redb-backed state persistence for upwatch.
//!
//! Provides typed operations over targets, transition history, and
//! settings. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn check_target_id(target_id: &str) -> StateResult<()> {
    if target_id.is_empty() || target_id.contains(':') {
        return Err(StateError::InvalidTargetId(target_id.to_string()));
    }
    Ok(())
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => StateError::Locked(path.display().to_string()),
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert or replace a target.
    pub fn put_target(&self, target: &MonitoredTarget) -> StateResult<()> {
        check_target_id(&target.id)?;
        let value = serde_json::to_vec(target).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            table
                .insert(target.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target_id = %target.id, "target stored");
        Ok(())
    }

    /// Get a target by ID.
    pub fn get_target(&self, target_id: &str) -> StateResult<Option<MonitoredTarget>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        match table.get(target_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let target: MonitoredTarget =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// List all targets, ordered by ID.
    pub fn list_targets(&self) -> StateResult<Vec<MonitoredTarget>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let target: MonitoredTarget =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(target);
        }
        Ok(results)
    }

    /// Delete a target by ID. Returns true if it existed.
    ///
    /// The target's history is kept.
    pub fn delete_target(&self, target_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            existed = table.remove(target_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%target_id, existed, "target deleted");
        Ok(existed)
    }

    /// Overwrite the stored online flag of a target.
    pub fn set_online_status(&self, target_id: &str, online: bool) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            let mut target: MonitoredTarget = match table.get(target_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::UnknownTarget(target_id.to_string())),
            };
            target.online = online;
            let value = serde_json::to_vec(&target).map_err(map_err!(Serialize))?;
            table
                .insert(target_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%target_id, online, "online status stored");
        Ok(())
    }

    /// Reconcile the stored targets with a configured set.
    ///
    /// Configured targets are upserted, keeping the stored `online` flag of
    /// targets that already exist. Stored targets missing from `targets` are
    /// deleted. Returns `(upserted, removed)`.
    pub fn sync_targets(&self, targets: &[MonitoredTarget]) -> StateResult<(usize, usize)> {
        for target in targets {
            check_target_id(&target.id)?;
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;

            let stale: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    (!targets.iter().any(|t| t.id == k)).then_some(k)
                })
                .collect();
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            removed = stale.len();

            for target in targets {
                let online = match table.get(target.id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let existing: MonitoredTarget = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?;
                        existing.online
                    }
                    None => target.online,
                };
                let merged = MonitoredTarget {
                    online,
                    ..target.clone()
                };
                let value = serde_json::to_vec(&merged).map_err(map_err!(Serialize))?;
                table
                    .insert(target.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(upserted = targets.len(), removed, "targets synced");
        Ok((targets.len(), removed))
    }

    // ── History ────────────────────────────────────────────────────

    /// Append a transition to a target's history.
    pub fn append_history(&self, target_id: &str, online: bool, at: u64) -> StateResult<()> {
        check_target_id(target_id)?;
        let record = HistoryRecord {
            target_id: target_id.to_string(),
            entry: HistoryEntry { online, at },
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            // Never overwrite: find the first free slot for this second.
            let mut seq = 0u16;
            let key = loop {
                let key = record.table_key(seq);
                if table.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
                    break key;
                }
                seq = seq
                    .checked_add(1)
                    .ok_or_else(|| StateError::HistoryFull { key: key.clone() })?;
            };
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%target_id, online, at, "history appended");
        Ok(())
    }

    /// All history entries of a target, oldest first.
    pub fn list_history(&self, target_id: &str) -> StateResult<Vec<HistoryEntry>> {
        let prefix = history_prefix(target_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(prefix.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let record: HistoryRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record.entry);
        }
        Ok(results)
    }

    /// The `limit` most recent history entries of a target, newest first.
    pub fn recent_history(&self, target_id: &str, limit: usize) -> StateResult<Vec<HistoryEntry>> {
        let mut all = self.list_history(target_id)?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Read a string setting.
    pub fn get_setting(&self, name: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: String =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write a string setting.
    pub fn put_setting(&self, name: &str, value: &str) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, "setting stored");
        Ok(())
    }

    /// Remove a setting. Returns true if it existed.
    pub fn delete_setting(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// The stored notification template, if any.
    pub fn notification_template(&self) -> StateResult<Option<String>> {
        self.get_setting(SETTING_NOTIFICATION_TEMPLATE)
    }

    pub fn set_notification_template(&self, template: &str) -> StateResult<()> {
        self.put_setting(SETTING_NOTIFICATION_TEMPLATE, template)
    }
}
