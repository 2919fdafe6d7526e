//! Domain records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lorastack_core::Result;
use lorastack_store::Fields;
use lorastack_store::Value;

use crate::identifiers::{
    ApplicationIdentifiers, EndDeviceIdentifiers, EntityIdentifiers, GatewayIdentifiers,
};

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// A record kept in a [`Registry`](crate::Registry).
pub trait Record:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// Entity name used in metrics and error messages.
    const ENTITY: &'static str;

    /// Prefix of the names of published events, e.g. `gateway.update`.
    const EVENT_PREFIX: &'static str = Self::ENTITY;

    /// Field paths worth a secondary index in an in-memory store.
    const INDEXED_FIELDS: &'static [&'static str];

    type Identifiers: Serialize + Clone + Send + Sync + std::fmt::Display;

    fn ids(&self) -> &Self::Identifiers;

    fn entity_identifiers(&self) -> EntityIdentifiers;

    fn validate(&self) -> Result<()>;

    /// Filters that must each match at most one record.
    fn natural_keys(&self) -> Vec<Fields>;

    fn created_at(&self) -> Option<DateTime<Utc>>;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn set_updated_at(&mut self, at: DateTime<Utc>);
}

macro_rules! timestamps {
    () => {
        fn created_at(&self) -> Option<DateTime<Utc>> {
            self.created_at
        }

        fn updated_at(&self) -> Option<DateTime<Utc>> {
            self.updated_at
        }

        fn set_created_at(&mut self, at: DateTime<Utc>) {
            self.created_at = Some(at);
        }

        fn set_updated_at(&mut self, at: DateTime<Utc>) {
            self.updated_at = Some(at);
        }
    };
}

fn key(pairs: &[(&str, String)]) -> Fields {
    pairs
        .iter()
        .map(|(path, value)| ((*path).to_string(), Value::String(value.clone())))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub ids: ApplicationIdentifiers,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub name: String,
    pub description: String,
    pub attributes: BTreeMap<String, String>,
}

impl Record for Application {
    const ENTITY: &'static str = "application";
    const INDEXED_FIELDS: &'static [&'static str] = &["ids.application_id"];

    type Identifiers = ApplicationIdentifiers;

    fn ids(&self) -> &ApplicationIdentifiers {
        &self.ids
    }

    fn entity_identifiers(&self) -> EntityIdentifiers {
        self.ids.clone().into()
    }

    fn validate(&self) -> Result<()> {
        self.ids.validate()
    }

    fn natural_keys(&self) -> Vec<Fields> {
        vec![key(&[("ids.application_id", self.ids.application_id.clone())])]
    }

    timestamps!();
}

/// Hardware and firmware identity reported by or configured for a gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionIdentifiers {
    pub brand_id: String,
    pub model_id: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gateway {
    pub ids: GatewayIdentifiers,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub name: String,
    pub description: String,
    /// Free-form attributes. Keys starting with `_cups` or `_lns` hold the
    /// configuration server state of the gateway.
    pub attributes: BTreeMap<String, String>,
    pub version_ids: VersionIdentifiers,
    pub gateway_server_address: String,
    pub auto_update: bool,
    pub update_channel: String,
    pub frequency_plan_id: String,
    pub status_public: bool,
    pub location_public: bool,
}

impl Gateway {
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map_or("", String::as_str)
    }
}

impl Record for Gateway {
    const ENTITY: &'static str = "gateway";
    const INDEXED_FIELDS: &'static [&'static str] = &["ids.gateway_id", "ids.eui"];

    type Identifiers = GatewayIdentifiers;

    fn ids(&self) -> &GatewayIdentifiers {
        &self.ids
    }

    fn entity_identifiers(&self) -> EntityIdentifiers {
        self.ids.clone().into()
    }

    fn validate(&self) -> Result<()> {
        self.ids.validate()
    }

    fn natural_keys(&self) -> Vec<Fields> {
        let mut keys = vec![key(&[("ids.gateway_id", self.ids.gateway_id.clone())])];
        if let Some(eui) = self.ids.eui.filter(|e| !e.is_zero()) {
            keys.push(key(&[("ids.eui", eui.to_string())]));
        }
        keys
    }

    timestamps!();
}

/// Root keys of an over-the-air activated device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootKeys {
    #[serde(with = "lorastack_store::value::bytes")]
    pub app_key: Vec<u8>,
    #[serde(with = "lorastack_store::value::bytes")]
    pub nwk_key: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndDevice {
    pub ids: EndDeviceIdentifiers,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub name: String,
    pub description: String,
    pub attributes: BTreeMap<String, String>,
    pub frequency_plan_id: String,
    pub lorawan_version: String,
    pub supports_join: bool,
    pub root_keys: Option<RootKeys>,
}

impl Record for EndDevice {
    const ENTITY: &'static str = "end_device";
    const EVENT_PREFIX: &'static str = "device";
    const INDEXED_FIELDS: &'static [&'static str] = &[
        "ids.application_ids.application_id",
        "ids.device_id",
        "ids.dev_eui",
    ];

    type Identifiers = EndDeviceIdentifiers;

    fn ids(&self) -> &EndDeviceIdentifiers {
        &self.ids
    }

    fn entity_identifiers(&self) -> EntityIdentifiers {
        self.ids.clone().into()
    }

    fn validate(&self) -> Result<()> {
        self.ids.validate()
    }

    fn natural_keys(&self) -> Vec<Fields> {
        let mut keys = vec![key(&[
            (
                "ids.application_ids.application_id",
                self.ids.application_ids.application_id.clone(),
            ),
            ("ids.device_id", self.ids.device_id.clone()),
        ])];
        if let (Some(join_eui), Some(dev_eui)) = (self.ids.join_eui, self.ids.dev_eui) {
            keys.push(key(&[
                ("ids.join_eui", join_eui.to_string()),
                ("ids.dev_eui", dev_eui.to_string()),
            ]));
        }
        keys
    }

    timestamps!();
}
