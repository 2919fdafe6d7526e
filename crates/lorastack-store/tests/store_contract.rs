//! Behaviour shared by every typed store backend.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use lorastack_store::flatten::{flatten, matches, select, unflatten};
use lorastack_store::{
    Database, Diff, Fields, IndexedStore, Key, MemoryStore, SqliteStore, TypedStore,
    TypedStoreAdapter, Value, from_value, to_value,
};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DeviceIds {
    device_id: String,
    application_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dev_eui: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Device {
    ids: DeviceIds,
    name: String,
    attributes: BTreeMap<String, String>,
    #[serde(with = "lorastack_store::value::bytes")]
    app_key: Vec<u8>,
    frequency_plan_id: String,
    supports_join: bool,
}

fn device(id: &str, app: &str) -> Device {
    Device {
        ids: DeviceIds {
            device_id: id.to_string(),
            application_id: app.to_string(),
            dev_eui: Some(format!("70B3D57ED000{:04X}", id.len())),
        },
        name: format!("Device {id}"),
        attributes: [("site".to_string(), "lab".to_string())].into(),
        app_key: vec![0x2b; 16],
        frequency_plan_id: "EU_863_870".to_string(),
        supports_join: true,
    }
}

fn to_fields(d: &Device) -> Fields {
    flatten(&to_value(d).unwrap()).unwrap()
}

fn to_device(fields: &Fields) -> Device {
    from_value(unflatten(fields)).unwrap()
}

async fn backends() -> Vec<(&'static str, Box<dyn TypedStore>)> {
    let db = Database::open_in_memory().await.unwrap();
    vec![
        (
            "indexed",
            Box::new(IndexedStore::new([
                "ids.application_id",
                "ids.dev_eui",
            ])) as Box<dyn TypedStore>,
        ),
        ("memory", Box::new(TypedStoreAdapter::new(MemoryStore::new()))),
        (
            "sqlite",
            Box::new(TypedStoreAdapter::new(SqliteStore::new(db, "devices"))),
        ),
    ]
}

#[tokio::test]
async fn create_then_find_restores_record() {
    for (name, store) in backends().await {
        let original = device("dev-1", "app-1");
        let key = store.create(to_fields(&original)).await.unwrap();
        assert!(!key.is_nil(), "{name}");
        let found = store.find(&key).await.unwrap();
        assert_eq!(to_device(&found), original, "{name}");
    }
}

#[tokio::test]
async fn update_applies_diff_pathwise() {
    for (name, store) in backends().await {
        let original = device("dev-1", "app-1");
        let key = store.create(to_fields(&original)).await.unwrap();

        let mut changed = original.clone();
        changed.name = String::new();
        changed.attributes = [("floor".to_string(), "2".to_string())].into();
        changed.frequency_plan_id = "US_902_928".to_string();

        let fields = ["name", "attributes", "frequency_plan_id"].map(String::from);
        let diff: Diff<Value> = select(&to_fields(&changed), &fields);
        store.update(&key, diff).await.unwrap();

        let found = to_device(&store.find(&key).await.unwrap());
        assert_eq!(found, changed, "{name}");
    }
}

#[tokio::test]
async fn update_with_map_value_replaces_subtree() {
    for (name, store) in backends().await {
        let key = store.create(to_fields(&device("dev-1", "app-1"))).await.unwrap();
        let mut attrs = BTreeMap::new();
        attrs.insert("rack".to_string(), Value::from("7"));
        let diff: Diff<Value> = [("attributes".to_string(), Some(Value::Map(attrs)))].into();
        store.update(&key, diff).await.unwrap();

        let found = to_device(&store.find(&key).await.unwrap());
        assert_eq!(
            found.attributes,
            BTreeMap::from([("rack".to_string(), "7".to_string())]),
            "{name}"
        );
    }
}

#[tokio::test]
async fn delete_is_idempotent_and_update_after_delete_fails() {
    for (name, store) in backends().await {
        let key = store.create(to_fields(&device("dev-1", "app-1"))).await.unwrap();
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        let err = store.update(&key, Diff::new()).await.unwrap_err();
        assert!(lorastack_core::errors::is_not_found(&err), "{name}");
        assert!(store.find(&key).await.is_err(), "{name}");
    }
}

#[tokio::test]
async fn find_by_returns_exactly_matching_records() {
    for (name, store) in backends().await {
        let mut keys = BTreeMap::new();
        for (id, app) in [("a1", "app-1"), ("a2", "app-1"), ("b1", "app-2"), ("b22", "app-2")] {
            let key = store.create(to_fields(&device(id, app))).await.unwrap();
            keys.insert(key, (id, app));
        }
        // Move one device between applications.
        let moved = *keys.iter().find(|(_, (id, _))| *id == "a2").unwrap().0;
        let diff: Diff<Value> = [(
            "ids.application_id".to_string(),
            Some(Value::from("app-2")),
        )]
        .into();
        store.update(&moved, diff).await.unwrap();

        for (filter, expected) in [
            (vec![("ids.application_id", "app-1")], vec!["a1"]),
            (vec![("ids.application_id", "app-2")], vec!["a2", "b1", "b22"]),
            (
                vec![("ids.application_id", "app-2"), ("name", "Device b1")],
                vec!["b1"],
            ),
            (vec![("name", "Device b22")], vec!["b22"]),
            (vec![("ids.application_id", "app-3")], vec![]),
            (vec![("missing.path", "x")], vec![]),
        ] {
            let filter: Fields = filter
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect();
            let found = store.find_by(&filter).await.unwrap();
            for fields in found.values() {
                assert!(matches(fields, &filter), "{name}");
            }
            let ids: BTreeSet<String> = found
                .values()
                .map(|f| to_device(f).ids.device_id)
                .collect();
            let expected: BTreeSet<String> = expected.into_iter().map(String::from).collect();
            assert_eq!(ids, expected, "{name}: {filter:?}");
        }
    }
}

#[tokio::test]
async fn range_visits_each_record_once() {
    for (name, store) in backends().await {
        for i in 0..7 {
            store
                .create(to_fields(&device(&format!("dev-{i}"), "app-1")))
                .await
                .unwrap();
        }
        let filter: Fields = [("ids.application_id".to_string(), Value::from("app-1"))].into();
        let mut seen = BTreeSet::new();
        let mut after: Option<Key> = None;
        loop {
            let page = store.range(&filter, after.as_ref(), 3).await.unwrap();
            let Some((last, _)) = page.last() else {
                break;
            };
            after = Some(*last);
            for (key, _) in page {
                assert!(seen.insert(key), "{name}: visited twice");
            }
        }
        assert_eq!(seen.len(), 7, "{name}");
    }
}
