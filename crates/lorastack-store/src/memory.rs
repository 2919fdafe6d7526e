//! In-memory byte store.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use lorastack_core::Result;

use crate::codec::ByteFields;
use crate::errors::ERR_NOT_FOUND;
use crate::flatten::{Diff, apply};
use crate::key::Key;
use crate::store::{ByteStore, page_size};

fn matches(record: &ByteFields, filter: &ByteFields) -> bool {
    filter
        .iter()
        .all(|(path, want)| record.get(path).is_some_and(|have| have == want))
}

/// Byte store holding every record in a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<Key, ByteFields>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ByteStore for MemoryStore {
    async fn create(&self, fields: ByteFields) -> Result<Key> {
        let key = Key::generate();
        self.records.write().await.insert(key, fields);
        Ok(key)
    }

    async fn find(&self, key: &Key) -> Result<ByteFields> {
        key.check()?;
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ERR_NOT_FOUND.with_attribute("key", key.to_string()))
    }

    async fn find_by(&self, filter: &ByteFields) -> Result<BTreeMap<Key, ByteFields>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| matches(r, filter))
            .map(|(k, r)| (*k, r.clone()))
            .collect())
    }

    async fn range(
        &self,
        filter: &ByteFields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, ByteFields)>> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(self
            .records
            .read()
            .await
            .range((lower, Bound::Unbounded))
            .filter(|(_, r)| matches(r, filter))
            .take(page_size(limit))
            .map(|(k, r)| (*k, r.clone()))
            .collect())
    }

    async fn update(&self, key: &Key, diff: Diff<Vec<u8>>) -> Result<()> {
        key.check()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| ERR_NOT_FOUND.with_attribute("key", key.to_string()))?;
        apply(record, &diff);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        key.check()?;
        self.records.write().await.remove(key);
        Ok(())
    }
}
