//! Store contracts.

use std::collections::BTreeMap;

use async_trait::async_trait;

use lorastack_core::Result;

use crate::codec::ByteFields;
use crate::flatten::{Diff, Fields};
use crate::key::Key;
use crate::value::Value;

/// Default page size of [`TypedStore::range`] when the caller passes 0.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A store whose values are flat maps of [`Value`] leaves.
#[async_trait]
pub trait TypedStore: Send + Sync {
    /// Persist `fields` under a fresh key.
    async fn create(&self, fields: Fields) -> Result<Key>;

    /// Fields of `key`, or `not_found`.
    async fn find(&self, key: &Key) -> Result<Fields>;

    /// All records having every `(path, value)` of `filter`.
    async fn find_by(&self, filter: &Fields) -> Result<BTreeMap<Key, Fields>>;

    /// Up to `limit` records matching `filter` with keys greater than
    /// `after`, in key order.
    async fn range(
        &self,
        filter: &Fields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, Fields)>>;

    /// Apply `diff` to the record at `key`, or fail with `not_found`.
    async fn update(&self, key: &Key, diff: Diff<Value>) -> Result<()>;

    /// Delete the record at `key`. Deleting an absent record succeeds.
    async fn delete(&self, key: &Key) -> Result<()>;
}

/// A store whose values are flat maps of tagged byte strings.
#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn create(&self, fields: ByteFields) -> Result<Key>;

    async fn find(&self, key: &Key) -> Result<ByteFields>;

    async fn find_by(&self, filter: &ByteFields) -> Result<BTreeMap<Key, ByteFields>>;

    async fn range(
        &self,
        filter: &ByteFields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, ByteFields)>>;

    async fn update(&self, key: &Key, diff: Diff<Vec<u8>>) -> Result<()>;

    async fn delete(&self, key: &Key) -> Result<()>;
}

pub(crate) const fn page_size(limit: usize) -> usize {
    if limit == 0 { DEFAULT_PAGE_SIZE } else { limit }
}
