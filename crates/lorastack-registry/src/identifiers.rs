//! Entity identifiers.
//!
//! Every record embeds its identifiers under the `ids` field path, so the
//! identifier structs double as natural-key filters.

use std::fmt;

use serde::{Deserialize, Serialize};

use lorastack_core::ids::validate_id;
use lorastack_core::{Eui64, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationIdentifiers {
    pub application_id: String,
}

impl ApplicationIdentifiers {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("application", &self.application_id)
    }
}

impl fmt::Display for ApplicationIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.application_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayIdentifiers {
    pub gateway_id: String,
    pub eui: Option<Eui64>,
}

impl GatewayIdentifiers {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            eui: None,
        }
    }

    /// Identifiers of a gateway named after its EUI (`eui-<hex>`).
    pub fn from_eui(eui: Eui64) -> Self {
        Self {
            gateway_id: eui.gateway_id(),
            eui: Some(eui),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("gateway", &self.gateway_id)
    }
}

impl fmt::Display for GatewayIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gateway_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EndDeviceIdentifiers {
    pub device_id: String,
    pub application_ids: ApplicationIdentifiers,
    pub dev_eui: Option<Eui64>,
    pub join_eui: Option<Eui64>,
}

impl EndDeviceIdentifiers {
    pub fn new(application_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            application_ids: ApplicationIdentifiers::new(application_id),
            dev_eui: None,
            join_eui: None,
        }
    }

    #[must_use]
    pub const fn with_euis(mut self, join_eui: Eui64, dev_eui: Eui64) -> Self {
        self.join_eui = Some(join_eui);
        self.dev_eui = Some(dev_eui);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.application_ids.validate()?;
        validate_id("end device", &self.device_id)
    }
}

/// Unique id within the application, e.g. `app-1.dev-1`.
impl fmt::Display for EndDeviceIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.application_ids, self.device_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UserIdentifiers {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationIdentifiers {
    pub organization_id: String,
}

/// Identifiers of any entity that can hold API keys or rights.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityIdentifiers {
    Application(ApplicationIdentifiers),
    Device(EndDeviceIdentifiers),
    Gateway(GatewayIdentifiers),
    User(UserIdentifiers),
    Organization(OrganizationIdentifiers),
}

impl EntityIdentifiers {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User(UserIdentifiers {
            user_id: user_id.into(),
        })
    }

    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self::Organization(OrganizationIdentifiers {
            organization_id: organization_id.into(),
        })
    }

    pub const fn entity_type(&self) -> &'static str {
        match self {
            Self::Application(_) => "application",
            Self::Device(_) => "end device",
            Self::Gateway(_) => "gateway",
            Self::User(_) => "user",
            Self::Organization(_) => "organization",
        }
    }

    /// The entity id without type, as used in messages.
    pub fn id_string(&self) -> String {
        match self {
            Self::Application(ids) => ids.to_string(),
            Self::Device(ids) => ids.to_string(),
            Self::Gateway(ids) => ids.to_string(),
            Self::User(ids) => ids.user_id.clone(),
            Self::Organization(ids) => ids.organization_id.clone(),
        }
    }

    /// Type-qualified id, unique across entity types. Gateway EUIs are not
    /// part of it, so the uid is stable when an EUI is added later.
    pub fn unique_id(&self) -> String {
        let kind = match self {
            Self::Application(_) => "application",
            Self::Device(_) => "device",
            Self::Gateway(_) => "gateway",
            Self::User(_) => "user",
            Self::Organization(_) => "organization",
        };
        format!("{kind}:{}", self.id_string())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Application(ids) => ids.validate(),
            Self::Device(ids) => ids.validate(),
            Self::Gateway(ids) => ids.validate(),
            Self::User(ids) => validate_id("user", &ids.user_id),
            Self::Organization(ids) => validate_id("organization", &ids.organization_id),
        }
    }
}

impl From<ApplicationIdentifiers> for EntityIdentifiers {
    fn from(ids: ApplicationIdentifiers) -> Self {
        Self::Application(ids)
    }
}

impl From<EndDeviceIdentifiers> for EntityIdentifiers {
    fn from(ids: EndDeviceIdentifiers) -> Self {
        Self::Device(ids)
    }
}

impl From<GatewayIdentifiers> for EntityIdentifiers {
    fn from(ids: GatewayIdentifiers) -> Self {
        Self::Gateway(ids)
    }
}

impl fmt::Display for EntityIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids() {
        let gw = GatewayIdentifiers::from_eui(Eui64::from_u64(0x58a0_cbff_fe80_0019));
        assert_eq!(gw.gateway_id, "eui-58a0cbfffe800019");
        assert_eq!(
            EntityIdentifiers::from(gw).unique_id(),
            "gateway:eui-58a0cbfffe800019"
        );
        let dev = EndDeviceIdentifiers::new("app-1", "dev-1");
        assert_eq!(EntityIdentifiers::from(dev).unique_id(), "device:app-1.dev-1");
        assert_eq!(EntityIdentifiers::user("alice").unique_id(), "user:alice");
    }

    #[test]
    fn validation_uses_identifier_rules() {
        assert!(GatewayIdentifiers::new("gw-1").validate().is_ok());
        assert!(GatewayIdentifiers::new("GW").validate().is_err());
        assert!(EndDeviceIdentifiers::new("app-1", "").validate().is_err());
        assert!(EntityIdentifiers::organization("acme").validate().is_ok());
    }
}
