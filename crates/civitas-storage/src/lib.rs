//! Civitas Storage - Transactional JSON-file store
//!
//! Data is organized in named columns of hex-encoded keys and values. All
//! writes go through [`Database::update`], which applies a closure's writes
//! atomically: either every write in the closure becomes visible and durable,
//! or none does.

pub mod error;
mod transaction;

pub use error::StorageError;
pub use transaction::Transaction;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DATA_FILE: &str = "data.json";

/// column -> hex key -> hex value
pub(crate) type Tables = BTreeMap<String, BTreeMap<String, String>>;

/// JSON file-backed key/value store with atomic multi-key transactions.
#[derive(Clone)]
pub struct Database {
    path: Option<PathBuf>,
    data: Arc<RwLock<Tables>>,
}

impl Database {
    /// Open (or create) a store in directory `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }
        fs::create_dir_all(path)?;

        let data_file = path.join(DATA_FILE);
        let data = if data_file.exists() {
            let content = fs::read_to_string(&data_file)?;
            serde_json::from_str(&content).map_err(|e| StorageError::Corrupted {
                path: data_file.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            Tables::new()
        };

        info!(path = %path.display(), columns = data.len(), "Opened database");

        Ok(Self {
            path: Some(path.to_path_buf()),
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Arc::new(RwLock::new(Tables::new())),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    pub fn get(&self, column: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read();
        match data.get(column).and_then(|c| c.get(&hex::encode(key))) {
            Some(value) => Ok(Some(hex::decode(value)?)),
            None => Ok(None),
        }
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        column: &str,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        match self.get(column, key)? {
            Some(bytes) => Ok(Some(decode_json(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All entries of a column, ordered by key bytes.
    pub fn scan(&self, column: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read();
        let Some(entries) = data.get(column) else {
            return Ok(Vec::new());
        };
        entries
            .iter()
            .map(|(k, v)| Ok((hex::decode(k)?, hex::decode(v)?)))
            .collect()
    }

    pub fn scan_json<T: DeserializeOwned>(&self, column: &str) -> Result<Vec<T>, StorageError> {
        self.scan(column)?
            .iter()
            .map(|(_, v)| decode_json(v))
            .collect()
    }

    /// Entries whose key starts with `prefix`, ordered by key bytes.
    pub fn scan_prefix(
        &self,
        column: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix_hex = hex::encode(prefix);
        let data = self.data.read();
        let Some(entries) = data.get(column) else {
            return Ok(Vec::new());
        };
        entries
            .range(prefix_hex.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix_hex))
            .map(|(k, v)| Ok((hex::decode(k)?, hex::decode(v)?)))
            .collect()
    }

    pub fn scan_prefix_json<T: DeserializeOwned>(
        &self,
        column: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>, StorageError> {
        self.scan_prefix(column, prefix)?
            .iter()
            .map(|(_, v)| decode_json(v))
            .collect()
    }

    pub fn put(&self, column: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.update(|txn| {
            txn.put(column, key, value);
            Ok::<_, StorageError>(())
        })
    }

    pub fn put_json<T: Serialize>(
        &self,
        column: &str,
        key: &[u8],
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode_json(value)?;
        self.put(column, key, &bytes)
    }

    pub fn delete(&self, column: &str, key: &[u8]) -> Result<(), StorageError> {
        self.update(|txn| {
            txn.delete(column, key);
            Ok::<_, StorageError>(())
        })
    }

    /// Run `f` as one atomic transaction.
    ///
    /// Transactions are serialized by the store's write lock. `f` sees its
    /// own writes. If `f` returns `Err`, nothing is written. If `f` returns
    /// `Ok`, the writes are persisted before they become visible to readers;
    /// a failed persist discards them and surfaces as a storage error.
    ///
    /// `f` must not block on I/O or `.await`.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut data = self.data.write();

        let (result, writes) = {
            let mut txn = Transaction::new(&data);
            let result = f(&mut txn);
            (result, txn.into_writes())
        };

        let value = result?;
        if writes.is_empty() {
            return Ok(value);
        }

        let mut next = data.clone();
        let count = writes.len();
        for ((column, key), write) in writes {
            match write {
                Some(v) => {
                    next.entry(column).or_default().insert(key, v);
                }
                None => {
                    if let Some(entries) = next.get_mut(&column) {
                        entries.remove(&key);
                    }
                }
            }
        }

        // Held across the file write so disk order matches commit order.
        self.persist(&next)?;
        *data = next;
        debug!(writes = count, "Committed transaction");

        Ok(value)
    }

    fn persist(&self, tables: &Tables) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(tables)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = path.join(format!("{DATA_FILE}.tmp"));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path.join(DATA_FILE))?;
        Ok(())
    }
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        value: u64,
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path()).unwrap();

        db.put("votes", b"key", b"value").unwrap();
        assert_eq!(db.get("votes", b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(db.get("votes", b"missing").unwrap(), None);
        assert_eq!(db.get("other", b"key").unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let db = Database::in_memory();
        db.put("c", b"k", b"v").unwrap();
        db.delete("c", b"k").unwrap();
        assert_eq!(db.get("c", b"k").unwrap(), None);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = Database::open(temp_dir.path()).unwrap();
            db.put_json("nonces", b"a", &Counter { value: 3 }).unwrap();
        }
        let db = Database::open(temp_dir.path()).unwrap();
        assert_eq!(
            db.get_json::<Counter>("nonces", b"a").unwrap(),
            Some(Counter { value: 3 })
        );
    }

    #[test]
    fn test_open_rejects_parent_dir() {
        let result = Database::open(Path::new("../escape"));
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DATA_FILE), "{not json").unwrap();
        let result = Database::open(temp_dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn test_update_commits_all_writes() {
        let db = Database::in_memory();
        db.update(|txn| {
            txn.put("a", b"1", b"x");
            txn.put("b", b"2", b"y");
            Ok::<_, StorageError>(())
        })
        .unwrap();
        assert_eq!(db.get("a", b"1").unwrap(), Some(b"x".to_vec()));
        assert_eq!(db.get("b", b"2").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn test_update_error_discards_writes() {
        let db = Database::in_memory();
        let result: Result<(), StorageError> = db.update(|txn| {
            txn.put("a", b"1", b"x");
            Err(StorageError::Io("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.get("a", b"1").unwrap(), None);
    }

    #[test]
    fn test_transaction_reads_own_writes() {
        let db = Database::in_memory();
        db.put_json("c", b"k", &Counter { value: 1 }).unwrap();
        let seen = db
            .update(|txn| {
                let mut counter: Counter = txn.get_json("c", b"k")?.unwrap_or(Counter { value: 0 });
                counter.value += 1;
                txn.put_json("c", b"k", &counter)?;
                let again: Option<Counter> = txn.get_json("c", b"k")?;
                Ok::<_, StorageError>(again)
            })
            .unwrap();
        assert_eq!(seen, Some(Counter { value: 2 }));
    }

    #[test]
    fn test_scan_is_ordered_and_merges_pending_writes() {
        let db = Database::in_memory();
        db.put("c", b"b", b"2").unwrap();
        db.put("c", b"a", b"1").unwrap();

        let keys: Vec<Vec<u8>> = db.scan("c").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        let inside = db
            .update(|txn| {
                txn.delete("c", b"a");
                txn.put("c", b"z", b"26");
                txn.scan("c")
            })
            .unwrap();
        let keys: Vec<Vec<u8>> = inside.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_scan_prefix() {
        let db = Database::in_memory();
        db.put("approvals", b"op1:alice", b"1").unwrap();
        db.put("approvals", b"op1:bob", b"2").unwrap();
        db.put("approvals", b"op2:alice", b"3").unwrap();

        let hits = db.scan_prefix("approvals", b"op1:").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(db.scan_prefix("approvals", b"op3:").unwrap().is_empty());

        let inside = db
            .update(|txn| {
                txn.put("approvals", b"op1:carol", b"4");
                txn.scan_prefix("approvals", b"op1:")
            })
            .unwrap();
        assert_eq!(inside.len(), 3);
    }

    #[test]
    fn test_concurrent_increments_are_serialized() {
        let db = Database::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        db.update(|txn| {
                            let mut c: Counter =
                                txn.get_json("c", b"k")?.unwrap_or(Counter { value: 0 });
                            c.value += 1;
                            txn.put_json("c", b"k", &c)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            db.get_json::<Counter>("c", b"k").unwrap(),
            Some(Counter { value: 400 })
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_failed_update_leaves_no_trace(
            writes in proptest::collection::vec(
                (0u8..4, proptest::collection::vec(proptest::prelude::any::<u8>(), 1..8)),
                1..20,
            ),
        ) {
            let db = Database::in_memory();
            db.put("c0", b"seed", b"v").unwrap();

            let result: Result<(), StorageError> = db.update(|txn| {
                for (column, key) in &writes {
                    txn.put(&format!("c{}", column), key, b"x");
                }
                Err(StorageError::Io("abort".into()))
            });
            proptest::prop_assert!(result.is_err());

            for (column, key) in &writes {
                let expected = (*column == 0 && key.as_slice() == b"seed").then(|| b"v".to_vec());
                proptest::prop_assert_eq!(db.get(&format!("c{}", column), key).unwrap(), expected);
            }
        }
    }
}
