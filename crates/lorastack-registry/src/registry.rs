//! Generic record registry over a typed store.
//!
//! A [`Registry`] wraps a [`TypedStore`] with a record type: it validates
//! records, maintains `created_at` / `updated_at`, translates field masks
//! into path-wise diffs, enforces natural-key uniqueness and publishes
//! domain events.
//!
//! Records are handed out as [`Stored`] handles, which remember the primary
//! key so the record can be written back or deleted later.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;

use lorastack_core::{Error, Eui64, Result};
use lorastack_store::flatten::{SEPARATOR, flatten, is_under, join, select, unflatten};
use lorastack_store::store::DEFAULT_PAGE_SIZE;
use lorastack_store::{Fields, IndexedStore, Key, TypedStore, Value, from_value, to_value};

use crate::errors::{
    ERR_ALREADY_EXISTS, ERR_CORRUPT_RECORD, ERR_INVALID_FIELD_PATH, ERR_NOT_FOUND, ERR_TOO_MANY,
};
use crate::events::{Event, EventBus};
use crate::identifiers::{ApplicationIdentifiers, EndDeviceIdentifiers, GatewayIdentifiers};
use crate::observe::Latency;
use crate::records::{Application, CREATED_AT, EndDevice, Gateway, Record, UPDATED_AT};

/// Field path of the identifiers of every record.
const IDS: &str = "ids";

pub type ApplicationRegistry = Registry<Application>;
pub type EndDeviceRegistry = Registry<EndDevice>;
pub type GatewayRegistry = Registry<Gateway>;

/// A record together with its primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<R> {
    key: Key,
    record: R,
}

impl<R> Stored<R> {
    pub const fn key(&self) -> &Key {
        &self.key
    }

    pub const fn record(&self) -> &R {
        &self.record
    }

    pub const fn record_mut(&mut self) -> &mut R {
        &mut self.record
    }

    pub fn into_record(self) -> R {
        self.record
    }
}

impl<R> Deref for Stored<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

/// Registry of records of type `R`.
pub struct Registry<R: Record> {
    store: Arc<dyn TypedStore>,
    events: EventBus,
    // Serialises the natural-key check with the insert.
    create_lock: Mutex<()>,
    latency: Latency,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> std::fmt::Debug for Registry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("entity", &R::ENTITY).finish_non_exhaustive()
    }
}

impl<R: Record> Registry<R> {
    pub fn new(store: Arc<dyn TypedStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            create_lock: Mutex::new(()),
            latency: Latency::new(R::ENTITY),
            _record: PhantomData,
        }
    }

    /// A registry on an in-memory store indexed on the record's
    /// identifier fields.
    pub fn in_memory(events: EventBus) -> Self {
        Self::new(
            Arc::new(IndexedStore::new(R::INDEXED_FIELDS.iter().copied())),
            events,
        )
    }

    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Persist a new record.
    ///
    /// `created_at` and `updated_at` are set to the current time. With a
    /// non-empty `fields` mask only those paths (and the identifiers and
    /// timestamps) are stored. Fails with `already_exists` if any natural
    /// key of the record is taken.
    pub async fn create(&self, mut record: R, fields: &[&str]) -> Result<Stored<R>> {
        let started = Instant::now();
        record.validate()?;
        let mut paths = Self::check_paths(fields)?;

        let now = Utc::now();
        record.set_created_at(now);
        record.set_updated_at(now);

        let flat = flatten(&to_value(&record)?)?;
        let stored_fields: Fields = if paths.is_empty() {
            paths = Self::top_level_fields()?;
            flat
        } else {
            paths.extend([IDS, CREATED_AT, UPDATED_AT].map(String::from));
            select(&flat, &paths)
                .into_iter()
                .filter_map(|(path, value)| Some((path, value?)))
                .collect()
        };

        let key = {
            let _guard = self.create_lock.lock().await;
            for filter in record.natural_keys() {
                if !self.store.find_by(&filter).await?.is_empty() {
                    return Err(ERR_ALREADY_EXISTS
                        .with_attributes([("entity", R::ENTITY), ("id", record.ids().to_string().as_str())]));
                }
            }
            self.store.create(stored_fields.clone()).await?
        };

        let record = Self::decode(&key, &stored_fields)?;
        self.events.publish(Event::new(
            R::EVENT_PREFIX,
            "create",
            record.entity_identifiers(),
            dedup(paths),
        ));
        self.latency.observe("create", started);
        Ok(Stored { key, record })
    }

    /// Read the record at `key`.
    pub async fn get(&self, key: &Key) -> Result<Stored<R>> {
        let fields = self
            .store
            .find(key)
            .await
            .map_err(|e| not_found::<R>(e, &key.to_string()))?;
        let record = Self::decode(key, &fields)?;
        Ok(Stored { key: *key, record })
    }

    /// Re-read a handle from the store.
    pub async fn load(&self, stored: &Stored<R>) -> Result<Stored<R>> {
        let started = Instant::now();
        let loaded = self.get(&stored.key).await;
        self.latency.observe("load", started);
        loaded
    }

    /// Write back the `fields` of a handle, or every field if `fields` is
    /// empty. `updated_at` is refreshed; identifiers and `created_at` are
    /// never rewritten.
    pub async fn store(&self, stored: &mut Stored<R>, fields: &[&str]) -> Result<()> {
        let started = Instant::now();
        let mut paths = if fields.is_empty() {
            Self::top_level_fields()?
        } else {
            Self::check_paths(fields)?
        };
        if let Some(path) = fields.iter().find(|f| is_under(f, IDS)) {
            return Err(ERR_INVALID_FIELD_PATH.with_attributes([("path", *path), ("entity", R::ENTITY)]));
        }
        paths.retain(|p| !is_under(p, IDS) && !is_under(p, CREATED_AT) && !is_under(p, UPDATED_AT));
        paths.push(UPDATED_AT.to_string());
        let paths = dedup(paths);

        stored.record.set_updated_at(Utc::now());
        let flat = flatten(&to_value(&stored.record)?)?;
        let diff = select(&flat, &paths);
        self.store
            .update(&stored.key, diff)
            .await
            .map_err(|e| not_found::<R>(e, &stored.record.ids().to_string()))?;

        self.events.publish(Event::new(
            R::EVENT_PREFIX,
            "update",
            stored.record.entity_identifiers(),
            paths,
        ));
        self.latency.observe("update", started);
        Ok(())
    }

    /// Delete the record of a handle. Deleting twice succeeds.
    pub async fn delete(&self, stored: &Stored<R>) -> Result<()> {
        let started = Instant::now();
        self.store.delete(&stored.key).await?;
        self.events.publish(Event::new(
            R::EVENT_PREFIX,
            "delete",
            stored.record.entity_identifiers(),
            Vec::new(),
        ));
        self.latency.observe("delete", started);
        Ok(())
    }

    /// Visit records matching `template` on the `fields` paths, or on every
    /// non-zero field of `template` if `fields` is empty.
    ///
    /// Records are fetched in pages of `batch` (0 for the default) and
    /// passed to `f` in key order until `f` returns `false`. Records
    /// created or deleted while ranging may or may not be visited, but no
    /// record is visited twice. Returns the number of records visited.
    pub async fn range<F>(&self, template: &R, fields: &[&str], batch: usize, mut f: F) -> Result<usize>
    where
        F: FnMut(Stored<R>) -> bool + Send,
    {
        let started = Instant::now();
        let flat = flatten(&to_value(template)?)?;
        let filter: Fields = if fields.is_empty() {
            flat
        } else {
            let paths = Self::check_paths(fields)?;
            flat.into_iter()
                .filter(|(p, _)| paths.iter().any(|f| is_under(p, f)))
                .collect()
        };
        let limit = if batch == 0 { DEFAULT_PAGE_SIZE } else { batch };

        let mut after: Option<Key> = None;
        let mut visited = 0;
        'pages: loop {
            let page = self.store.range(&filter, after.as_ref(), limit).await?;
            let len = page.len();
            for (key, fields) in page {
                after = Some(key);
                let record = Self::decode(&key, &fields)?;
                visited += 1;
                if !f(Stored { key, record }) {
                    break 'pages;
                }
            }
            if len < limit {
                break;
            }
        }
        self.latency.observe("range", started);
        Ok(visited)
    }

    /// All records whose identifiers match the non-zero fields of `ids`.
    /// A non-empty `fields` mask limits the returned fields.
    pub async fn find_by_identifiers(
        &self,
        ids: &R::Identifiers,
        fields: &[&str],
    ) -> Result<Vec<Stored<R>>> {
        let filter = Self::identifier_filter(ids)?;
        self.find_by_filter(&filter, fields).await
    }

    /// The only record whose identifiers match `ids`.
    ///
    /// Fails with `not_found` when nothing matches and `too_many` when more
    /// than one record does.
    pub async fn find_one_by_identifiers(
        &self,
        ids: &R::Identifiers,
        fields: &[&str],
    ) -> Result<Stored<R>> {
        let found = self.find_by_identifiers(ids, fields).await?;
        one(found, &ids.to_string())
    }

    async fn find_by_filter(&self, filter: &Fields, fields: &[&str]) -> Result<Vec<Stored<R>>> {
        let started = Instant::now();
        let mask = Self::check_paths(fields)?;
        let found = self.store.find_by(filter).await?;
        let mut out = Vec::with_capacity(found.len());
        for (key, record_fields) in found {
            let record_fields = if mask.is_empty() {
                record_fields
            } else {
                retain_paths(record_fields, &mask)
            };
            out.push(Stored {
                key,
                record: Self::decode(&key, &record_fields)?,
            });
        }
        self.latency.observe("range", started);
        Ok(out)
    }

    fn identifier_filter(ids: &R::Identifiers) -> Result<Fields> {
        Ok(flatten(&to_value(ids)?)?
            .into_iter()
            .map(|(path, value)| (join(IDS, &path), value))
            .collect())
    }

    fn decode(key: &Key, fields: &Fields) -> Result<R> {
        from_value(unflatten(fields)).map_err(|e| {
            ERR_CORRUPT_RECORD
                .with_attributes([("entity", R::ENTITY), ("key", key.to_string().as_str())])
                .with_cause(e)
        })
    }

    fn top_level_fields() -> Result<Vec<String>> {
        match to_value(&R::default())? {
            Value::Map(m) => Ok(m.into_keys().collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Check that every path starts with a field of the record.
    fn check_paths(fields: &[&str]) -> Result<Vec<String>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let top = Self::top_level_fields()?;
        fields
            .iter()
            .map(|field| {
                let head = field.split(SEPARATOR).next().unwrap_or_default();
                if top.iter().any(|t| t == head) && !field.ends_with(SEPARATOR) {
                    Ok((*field).to_string())
                } else {
                    Err(ERR_INVALID_FIELD_PATH.with_attributes([("path", *field), ("entity", R::ENTITY)]))
                }
            })
            .collect()
    }
}

impl Registry<Application> {
    pub async fn get_by_id(&self, application_id: &str, fields: &[&str]) -> Result<Stored<Application>> {
        self.find_one_by_identifiers(
            &ApplicationIdentifiers::new(application_id),
            fields,
        )
        .await
    }
}

impl Registry<Gateway> {
    pub async fn get_by_id(&self, gateway_id: &str, fields: &[&str]) -> Result<Stored<Gateway>> {
        self.find_one_by_identifiers(&GatewayIdentifiers::new(gateway_id), fields)
            .await
    }

    /// Identifiers of the gateway with the given EUI.
    pub async fn get_identifiers_for_eui(
        &self,
        eui: Eui64,
    ) -> Result<GatewayIdentifiers> {
        let filter: Fields = [(join(IDS, "eui"), Value::String(eui.to_string()))].into();
        let found = self.find_by_filter(&filter, &[IDS]).await?;
        Ok(one(found, &eui.to_string())?.into_record().ids)
    }
}

impl Registry<EndDevice> {
    pub async fn get_by_id(
        &self,
        application_id: &str,
        device_id: &str,
        fields: &[&str],
    ) -> Result<Stored<EndDevice>> {
        self.find_one_by_identifiers(
            &EndDeviceIdentifiers::new(application_id, device_id),
            fields,
        )
        .await
    }

    /// The device activated with `join_eui` / `dev_eui`.
    pub async fn get_by_eui(
        &self,
        join_eui: Eui64,
        dev_eui: Eui64,
        fields: &[&str],
    ) -> Result<Stored<EndDevice>> {
        let filter: Fields = [
            (join(IDS, "join_eui"), Value::String(join_eui.to_string())),
            (join(IDS, "dev_eui"), Value::String(dev_eui.to_string())),
        ]
        .into();
        let found = self.find_by_filter(&filter, fields).await?;
        one(found, &format!("{join_eui}/{dev_eui}"))
    }
}

fn one<R: Record>(mut found: Vec<Stored<R>>, id: &str) -> Result<Stored<R>> {
    match found.len() {
        0 => Err(ERR_NOT_FOUND.with_attributes([("entity", R::ENTITY), ("id", id)])),
        1 => Ok(found.remove(0)),
        n => Err(ERR_TOO_MANY
            .with_attributes([("entity", R::ENTITY), ("id", id)])
            .with_attribute("count", n)),
    }
}

/// Map the store's `not_found` to the registry's, keeping other errors.
fn not_found<R: Record>(err: Error, id: &str) -> Error {
    if err.is(&lorastack_store::errors::ERR_NOT_FOUND) {
        ERR_NOT_FOUND
            .with_attributes([("entity", R::ENTITY), ("id", id)])
            .with_cause(err)
    } else {
        err
    }
}

/// Keep the paths below any of `mask`, the identifiers and the timestamps.
fn retain_paths(fields: Fields, mask: &[String]) -> Fields {
    fields
        .into_iter()
        .filter(|(path, _)| {
            [IDS, CREATED_AT, UPDATED_AT]
                .iter()
                .any(|f| is_under(path, f))
                || mask.iter().any(|f| is_under(path, f))
        })
        .collect()
}

fn dedup(paths: Vec<String>) -> Vec<String> {
    paths.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
