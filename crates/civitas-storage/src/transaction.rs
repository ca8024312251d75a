use crate::{decode_json, encode_json, StorageError, Tables};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

type WriteSet = BTreeMap<(String, String), Option<String>>;

/// Buffered view over the store used inside [`crate::Database::update`].
///
/// Reads check the pending write set first, then the committed tables.
pub struct Transaction<'a> {
    base: &'a Tables,
    writes: WriteSet,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            writes: WriteSet::new(),
        }
    }

    pub(crate) fn into_writes(self) -> WriteSet {
        self.writes
    }

    pub fn get(&self, column: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key_hex = hex::encode(key);
        let value = match self.writes.get(&(column.to_string(), key_hex.clone())) {
            Some(pending) => pending.as_ref(),
            None => self.base.get(column).and_then(|c| c.get(&key_hex)),
        };
        match value {
            Some(v) => Ok(Some(hex::decode(v)?)),
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

    pub fn contains(&self, column: &str, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(column, key)?.is_some())
    }

    pub fn put(&mut self, column: &str, key: &[u8], value: &[u8]) {
        self.writes.insert(
            (column.to_string(), hex::encode(key)),
            Some(hex::encode(value)),
        );
    }

    pub fn put_json<T: Serialize>(
        &mut self,
        column: &str,
        key: &[u8],
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode_json(value)?;
        self.put(column, key, &bytes);
        Ok(())
    }

    pub fn delete(&mut self, column: &str, key: &[u8]) {
        self.writes.insert((column.to_string(), hex::encode(key)), None);
    }

    /// Entries of a column as this transaction sees them, ordered by key.
    pub fn scan(&self, column: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<&str, Option<&str>> = self
            .base
            .get(column)
            .map(|c| c.iter().map(|(k, v)| (k.as_str(), Some(v.as_str()))).collect())
            .unwrap_or_default();

        for ((col, key), value) in &self.writes {
            if col == column {
                merged.insert(key.as_str(), value.as_deref());
            }
        }

        merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .map(|(k, v)| Ok((hex::decode(k)?, hex::decode(v)?)))
            .collect()
    }

    pub fn scan_prefix(
        &self,
        column: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix_hex = hex::encode(prefix);
        let mut hits = Vec::new();
        for (key, value) in self.scan(column)? {
            if hex::encode(&key).starts_with(&prefix_hex) {
                hits.push((key, value));
            }
        }
        Ok(hits)
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

    pub fn scan_json<T: DeserializeOwned>(&self, column: &str) -> Result<Vec<T>, StorageError> {
        self.scan(column)?
            .iter()
            .map(|(_, v)| decode_json(v))
            .collect()
    }
}
