//! In-memory typed store with secondary indexes.
//!
//! The store is parameterised by a fixed set of indexed field paths. For
//! each of them it keeps buckets of primary keys keyed by the stringified
//! field value. Mutations take the write lock of the whole store, so
//! readers never observe a record whose index entries are out of date.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use lorastack_core::Result;

use crate::errors::ERR_NOT_FOUND;
use crate::flatten::{Diff, Fields, apply, expand, flatten_filter, matches};
use crate::key::Key;
use crate::store::{TypedStore, page_size};
use crate::value::Value;

type Bucket = (String, String);

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<Key, Fields>,
    index: HashMap<Bucket, BTreeSet<Key>>,
}

impl State {
    fn index_record(&mut self, indexed: &BTreeSet<String>, key: Key, record: &Fields) {
        for field in indexed {
            if let Some(value) = record.get(field) {
                self.index
                    .entry((field.clone(), value.index_key()))
                    .or_default()
                    .insert(key);
            }
        }
    }

    fn unindex_record(&mut self, indexed: &BTreeSet<String>, key: Key, record: &Fields) {
        for field in indexed {
            if let Some(value) = record.get(field) {
                let bucket = (field.clone(), value.index_key());
                if let Some(keys) = self.index.get_mut(&bucket) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.index.remove(&bucket);
                    }
                }
            }
        }
    }

    /// Candidate keys for the indexed part of a filter, intersecting the
    /// smallest bucket first. `None` if the filter has no indexed field.
    fn candidates(&self, indexed: &Fields) -> Option<BTreeSet<Key>> {
        if indexed.is_empty() {
            return None;
        }
        let empty = BTreeSet::new();
        let mut buckets: Vec<&BTreeSet<Key>> = indexed
            .iter()
            .map(|(f, v)| self.index.get(&(f.clone(), v.index_key())).unwrap_or(&empty))
            .collect();
        buckets.sort_by_key(|b| b.len());
        let (first, rest) = buckets.split_first()?;
        let mut keys: BTreeSet<Key> = (*first).clone();
        for bucket in rest {
            if keys.is_empty() {
                break;
            }
            keys.retain(|k| bucket.contains(k));
        }
        Some(keys)
    }
}

/// Typed in-memory store with secondary indexes.
#[derive(Debug)]
pub struct IndexedStore {
    indexed: BTreeSet<String>,
    state: RwLock<State>,
}

impl IndexedStore {
    pub fn new<I, S>(indexed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indexed: indexed.into_iter().map(Into::into).collect(),
            state: RwLock::new(State::default()),
        }
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.indexed.iter().map(String::as_str)
    }

    /// The indexed part of a filter.
    fn indexed_part(&self, filter: &Fields) -> Fields {
        filter
            .iter()
            .filter(|(k, _)| self.indexed.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn select<'a>(
        &self,
        state: &'a State,
        filter: &Fields,
        lower: Bound<&Key>,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Fields)> + 'a> {
        let indexed = self.indexed_part(filter);
        let filter = filter.clone();
        match state.candidates(&indexed) {
            // Buckets are keyed by the stringified value, so candidates
            // are checked against the whole typed filter.
            Some(keys) => {
                trace!(candidates = keys.len(), "Indexed lookup");
                let keys: Vec<Key> = keys.range((lower, Bound::Unbounded)).copied().collect();
                Box::new(keys.into_iter().filter_map(move |k| {
                    let (key, record) = state.records.get_key_value(&k)?;
                    matches(record, &filter).then_some((key, record))
                }))
            }
            None => {
                Box::new(
                    state
                        .records
                        .range((lower, Bound::Unbounded))
                        .filter(move |(_, r)| matches(r, &filter)),
                )
            }
        }
    }
}

#[async_trait]
impl TypedStore for IndexedStore {
    async fn create(&self, fields: Fields) -> Result<Key> {
        let record: Fields = fields.into_iter().filter(|(_, v)| !v.is_zero()).collect();
        let key = Key::generate();
        let mut state = self.state.write().await;
        state.index_record(&self.indexed, key, &record);
        state.records.insert(key, record);
        Ok(key)
    }

    async fn find(&self, key: &Key) -> Result<Fields> {
        key.check()?;
        self.state
            .read()
            .await
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| ERR_NOT_FOUND.with_attribute("key", key.to_string()))
    }

    async fn find_by(&self, filter: &Fields) -> Result<BTreeMap<Key, Fields>> {
        let filter = flatten_filter(filter)?;
        let state = self.state.read().await;
        Ok(self
            .select(&state, &filter, Bound::Unbounded)
            .map(|(k, r)| (*k, r.clone()))
            .collect())
    }

    async fn range(
        &self,
        filter: &Fields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, Fields)>> {
        let filter = flatten_filter(filter)?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let state = self.state.read().await;
        Ok(self
            .select(&state, &filter, lower)
            .take(page_size(limit))
            .map(|(k, r)| (*k, r.clone()))
            .collect())
    }

    async fn update(&self, key: &Key, diff: Diff<Value>) -> Result<()> {
        key.check()?;
        let diff = expand(diff)?;
        let mut state = self.state.write().await;
        let Some(mut record) = state.records.remove(key) else {
            return Err(ERR_NOT_FOUND.with_attribute("key", key.to_string()));
        };
        state.unindex_record(&self.indexed, *key, &record);
        apply(&mut record, &diff);
        state.index_record(&self.indexed, *key, &record);
        state.records.insert(*key, record);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        key.check()?;
        let mut state = self.state.write().await;
        if let Some(record) = state.records.remove(key) {
            state.unindex_record(&self.indexed, *key, &record);
        }
        Ok(())
    }
}
