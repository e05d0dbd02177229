//! ACID-durable `KVStore` backed by redb.
//!
//! Used when the cache's KV layer must survive process restarts. Every
//! write is a full redb transaction; reads use MVCC snapshots.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};

use crate::error::StoreError;

use super::{KVStore, Record, StoreResult};

/// Table for cache records (string keys → JSON-encoded values).
const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("qcache");

/// ACID-durable `KVStore` using redb.
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Open or create a durable store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io { source: e })?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", path.display()),
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Get a reference to the underlying database (for custom maintenance).
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl KVStore for RedbKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Record>> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = match txn.open_table(CACHE_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => {
                return Err(StoreError::Redb {
                    message: format!("open_table failed: {e}"),
                })
            }
        };
        let result = table.get(key).map_err(|e| StoreError::Redb {
            message: format!("get failed: {e}"),
        })?;
        match result {
            None => Ok(None),
            Some(guard) => {
                let bytes = guard.value();
                let value: Record =
                    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
                        key: key.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(value))
            }
        }
    }

    fn set(&self, key: &str, value: Record) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&value).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn.open_table(CACHE_TABLE).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| StoreError::Redb {
                    message: format!("insert failed: {e}"),
                })?;
        }
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn.open_table(CACHE_TABLE).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            table.remove(key).map_err(|e| StoreError::Redb {
                message: format!("remove failed: {e}"),
            })?;
        }
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for RedbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKvStore").finish()
    }
}
