//! redb-backed sync state store.
//!
//! Three tables at `<config>/sync/index.db`:
//!
//! - `configs`: config id → [`SyncConfig`] (JSON)
//! - `entries`: (config id, rel path) → [`SyncEntry`] (JSON)
//! - `cursors`: config id → change-feed token
//!
//! Multi-row writes happen inside a single write transaction; removing a
//! config cascades its entries and cursor. Upserts are idempotent. Reads go
//! through read transactions and may run concurrently.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

use gdrv_core::{AppError, AppResult, ErrorKind};

use crate::model::{SyncConfig, SyncEntry};

/// Internal store failure, folded into [`AppError`] at the API boundary.
#[derive(Debug, Error)]
enum StoreError {
    #[error("database failure: {0}")]
    Database(String),
    #[error("transaction failure: {0}")]
    Transaction(String),
    #[error("table failure: {0}")]
    Table(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::new(ErrorKind::Unknown, format!("sync state store: {error}"))
    }
}

const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");
const ENTRIES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("entries");
const CURSORS: TableDefinition<&str, &str> = TableDefinition::new("cursors");

/// Handle to the embedded sync database.
pub struct SyncStateStore {
    db: Database,
}

impl SyncStateStore {
    /// Opens (or creates) the database and its tables.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            gdrv_core::paths::create_dir_secure(parent)?;
        }
        let db = Database::create(path).map_err(db_error)?;
        let store = Self { db };
        // Creating the tables up front keeps every later read infallible
        // with respect to table existence.
        let txn = store.db.begin_write().map_err(db_error)?;
        {
            txn.open_table(CONFIGS).map_err(table_error)?;
            txn.open_table(ENTRIES).map_err(table_error)?;
            txn.open_table(CURSORS).map_err(table_error)?;
        }
        txn.commit().map_err(tx_error)?;
        Ok(store)
    }

    /// Inserts or replaces a sync configuration.
    pub fn upsert_config(&self, config: &SyncConfig) -> AppResult<()> {
        let bytes = serde_json::to_vec(config)?;
        let txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut table = txn.open_table(CONFIGS).map_err(table_error)?;
            table
                .insert(config.id.as_str(), bytes.as_slice())
                .map_err(db_error)?;
        }
        txn.commit().map_err(tx_error)?;
        Ok(())
    }

    /// Loads one configuration.
    pub fn get_config(&self, id: &str) -> AppResult<Option<SyncConfig>> {
        let txn = self.db.begin_read().map_err(db_error)?;
        let table = txn.open_table(CONFIGS).map_err(table_error)?;
        let Some(guard) = table.get(id).map_err(db_error)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Loads a configuration or fails with [`ErrorKind::NotFound`].
    pub fn require_config(&self, id: &str) -> AppResult<SyncConfig> {
        self.get_config(id)?.ok_or_else(|| {
            AppError::new(
                ErrorKind::NotFound,
                format!("no sync configuration '{id}'; run 'gdrv sync init' first"),
            )
        })
    }

    /// Lists every configuration, ordered by id.
    pub fn list_configs(&self) -> AppResult<Vec<SyncConfig>> {
        let txn = self.db.begin_read().map_err(db_error)?;
        let table = txn.open_table(CONFIGS).map_err(table_error)?;
        let mut configs = Vec::new();
        for item in table.iter().map_err(db_error)? {
            let (_, value) = item.map_err(db_error)?;
            configs.push(serde_json::from_slice(value.value())?);
        }
        Ok(configs)
    }

    /// Removes a configuration, cascading its entries and cursor.
    ///
    /// Returns `false` when no such configuration existed.
    pub fn remove_config(&self, id: &str) -> AppResult<bool> {
        let txn = self.db.begin_write().map_err(db_error)?;
        let existed;
        {
            let mut configs = txn.open_table(CONFIGS).map_err(table_error)?;
            existed = configs.remove(id).map_err(db_error)?.is_some();

            let mut entries = txn.open_table(ENTRIES).map_err(table_error)?;
            let keys: Vec<String> = entries
                .range((id, "")..)
                .map_err(db_error)?
                .map_while(|item| {
                    let (key, _) = item.ok()?;
                    let (config_id, rel_path) = key.value();
                    (config_id == id).then(|| rel_path.to_owned())
                })
                .collect();
            for rel_path in keys {
                entries.remove((id, rel_path.as_str())).map_err(db_error)?;
            }

            let mut cursors = txn.open_table(CURSORS).map_err(table_error)?;
            cursors.remove(id).map_err(db_error)?;
        }
        txn.commit().map_err(tx_error)?;
        Ok(existed)
    }

    /// Inserts or replaces one index entry.
    pub fn upsert_entry(&self, config_id: &str, entry: &SyncEntry) -> AppResult<()> {
        self.upsert_entries(config_id, std::slice::from_ref(entry))
    }

    /// Inserts or replaces a batch of index entries in one transaction.
    pub fn upsert_entries(&self, config_id: &str, entries: &[SyncEntry]) -> AppResult<()> {
        let txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(table_error)?;
            for entry in entries {
                let bytes = serde_json::to_vec(entry)?;
                table
                    .insert((config_id, entry.rel_path.as_str()), bytes.as_slice())
                    .map_err(db_error)?;
            }
        }
        txn.commit().map_err(tx_error)?;
        Ok(())
    }

    /// Loads one index entry.
    pub fn get_entry(&self, config_id: &str, rel_path: &str) -> AppResult<Option<SyncEntry>> {
        let txn = self.db.begin_read().map_err(db_error)?;
        let table = txn.open_table(ENTRIES).map_err(table_error)?;
        let Some(guard) = table.get((config_id, rel_path)).map_err(db_error)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Lists every index entry for a configuration, ordered by path.
    pub fn list_entries(&self, config_id: &str) -> AppResult<Vec<SyncEntry>> {
        let txn = self.db.begin_read().map_err(db_error)?;
        let table = txn.open_table(ENTRIES).map_err(table_error)?;
        let mut entries = Vec::new();
        for item in table.range((config_id, "")..).map_err(db_error)? {
            let (key, value) = item.map_err(db_error)?;
            if key.value().0 != config_id {
                break;
            }
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// Removes one index entry; a no-op when absent.
    pub fn remove_entry(&self, config_id: &str, rel_path: &str) -> AppResult<()> {
        let txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(table_error)?;
            table.remove((config_id, rel_path)).map_err(db_error)?;
        }
        txn.commit().map_err(tx_error)?;
        Ok(())
    }

    /// Records the last-observed change-feed token.
    pub fn set_cursor(&self, config_id: &str, token: &str) -> AppResult<()> {
        let txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut table = txn.open_table(CURSORS).map_err(table_error)?;
            table.insert(config_id, token).map_err(db_error)?;
        }
        txn.commit().map_err(tx_error)?;
        Ok(())
    }

    /// Returns the stored change-feed token, if any.
    pub fn get_cursor(&self, config_id: &str) -> AppResult<Option<String>> {
        let txn = self.db.begin_read().map_err(db_error)?;
        let table = txn.open_table(CURSORS).map_err(table_error)?;
        Ok(table
            .get(config_id)
            .map_err(db_error)?
            .map(|guard| guard.value().to_owned()))
    }
}

fn db_error(error: impl std::fmt::Display) -> AppError {
    StoreError::Database(error.to_string()).into()
}

fn tx_error(error: impl std::fmt::Display) -> AppError {
    StoreError::Transaction(error.to_string()).into()
}

fn table_error(error: impl std::fmt::Display) -> AppError {
    StoreError::Table(error.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictPolicy, SyncDirection};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn store(temp: &tempfile::TempDir) -> SyncStateStore {
        SyncStateStore::open(&temp.path().join("sync/index.db")).expect("open")
    }

    fn config(id: &str) -> SyncConfig {
        SyncConfig {
            id: id.to_owned(),
            local_root: PathBuf::from("/tmp/proj"),
            remote_root_id: String::from("0ABC"),
            excludes: vec![],
            conflict_policy: ConflictPolicy::RemoteWins,
            direction: SyncDirection::Bidirectional,
        }
    }

    fn entry(rel_path: &str) -> SyncEntry {
        SyncEntry {
            rel_path: rel_path.to_owned(),
            local_size: Some(42),
            local_mtime: Some(1_750_000_000),
            remote_id: Some(format!("id-{rel_path}")),
            ..SyncEntry::default()
        }
    }

    #[test]
    fn config_upsert_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        store.upsert_config(&config("c1")).expect("first");
        store.upsert_config(&config("c1")).expect("second");
        assert_eq!(store.list_configs().expect("list").len(), 1);
        assert_eq!(store.require_config("c1").expect("get").remote_root_id, "0ABC");
    }

    #[test]
    fn missing_config_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        let error = store.require_config("ghost").expect_err("missing");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn entries_batch_and_list_by_config() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        store
            .upsert_entries("c1", &[entry("a.txt"), entry("b/c.txt")])
            .expect("batch");
        store.upsert_entry("c2", &entry("other.txt")).expect("single");

        let listed = store.list_entries("c1").expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].rel_path, "a.txt");
        assert_eq!(listed[1].rel_path, "b/c.txt");

        let got = store.get_entry("c1", "a.txt").expect("get").expect("present");
        assert_eq!(got.local_size, Some(42));
        assert!(store.get_entry("c1", "other.txt").expect("get").is_none());
    }

    #[test]
    fn upserting_an_entry_replaces_the_previous_record() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        store.upsert_entry("c1", &entry("a.txt")).expect("insert");
        let mut updated = entry("a.txt");
        updated.local_size = Some(99);
        store.upsert_entry("c1", &updated).expect("replace");

        let listed = store.list_entries("c1").expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].local_size, Some(99));
    }

    #[test]
    fn removing_a_config_cascades_entries_and_cursor() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        store.upsert_config(&config("c1")).expect("config");
        store
            .upsert_entries("c1", &[entry("a.txt"), entry("b.txt")])
            .expect("entries");
        store.set_cursor("c1", "token-7").expect("cursor");
        store.upsert_config(&config("c2")).expect("other config");
        store.upsert_entry("c2", &entry("keep.txt")).expect("other entry");

        assert!(store.remove_config("c1").expect("remove"));
        assert!(store.get_config("c1").expect("get").is_none());
        assert!(store.list_entries("c1").expect("list").is_empty());
        assert!(store.get_cursor("c1").expect("cursor").is_none());

        // Unrelated configs are untouched.
        assert_eq!(store.list_entries("c2").expect("list").len(), 1);
        assert!(!store.remove_config("c1").expect("second remove"));
    }

    #[test]
    fn cursors_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = store(&temp);
        assert!(store.get_cursor("c1").expect("empty").is_none());
        store.set_cursor("c1", "page-token-1").expect("set");
        store.set_cursor("c1", "page-token-2").expect("replace");
        assert_eq!(store.get_cursor("c1").expect("get").as_deref(), Some("page-token-2"));
    }

    #[test]
    fn reopening_the_database_preserves_state() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sync/index.db");
        {
            let store = SyncStateStore::open(&path).expect("open");
            store.upsert_config(&config("c1")).expect("config");
            store.upsert_entry("c1", &entry("a.txt")).expect("entry");
        }
        let store = SyncStateStore::open(&path).expect("reopen");
        assert!(store.get_config("c1").expect("get").is_some());
        assert_eq!(store.list_entries("c1").expect("list").len(), 1);
    }
}
