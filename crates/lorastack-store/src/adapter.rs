//! Typed view of a byte store.

use std::collections::BTreeMap;

use async_trait::async_trait;

use lorastack_core::Result;

use crate::codec::{decode_fields, encode_diff, encode_fields};
use crate::flatten::{Diff, Fields, expand, flatten_filter};
use crate::key::Key;
use crate::store::{ByteStore, TypedStore};
use crate::value::Value;

/// Encodes typed fields with the tagged codec before handing them to the
/// wrapped byte store.
#[derive(Debug)]
pub struct TypedStoreAdapter<S> {
    inner: S,
}

impl<S: ByteStore> TypedStoreAdapter<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ByteStore> TypedStore for TypedStoreAdapter<S> {
    async fn create(&self, fields: Fields) -> Result<Key> {
        let fields: Fields = fields.into_iter().filter(|(_, v)| !v.is_zero()).collect();
        self.inner.create(encode_fields(&fields)?).await
    }

    async fn find(&self, key: &Key) -> Result<Fields> {
        decode_fields(&self.inner.find(key).await?)
    }

    async fn find_by(&self, filter: &Fields) -> Result<BTreeMap<Key, Fields>> {
        let filter = encode_fields(&flatten_filter(filter)?)?;
        self.inner
            .find_by(&filter)
            .await?
            .into_iter()
            .map(|(k, v)| Ok((k, decode_fields(&v)?)))
            .collect()
    }

    async fn range(
        &self,
        filter: &Fields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, Fields)>> {
        let filter = encode_fields(&flatten_filter(filter)?)?;
        self.inner
            .range(&filter, after, limit)
            .await?
            .into_iter()
            .map(|(k, v)| Ok((k, decode_fields(&v)?)))
            .collect()
    }

    async fn update(&self, key: &Key, diff: Diff<Value>) -> Result<()> {
        let diff = encode_diff(&expand(diff)?)?;
        self.inner.update(key, diff).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.inner.delete(key).await
    }
}
