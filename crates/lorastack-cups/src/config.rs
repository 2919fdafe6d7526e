//! Configuration of the configuration server.
//!
//! Resolution order, lowest priority first:
//! 1. Built-in defaults
//! 2. JSON config file
//! 3. Environment variables (`LORASTACK_*`)
//! 4. Command line arguments, applied by the binary

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lorastack_registry::EntityIdentifiers;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve only gateways whose `_cups` attribute is set.
    pub require_explicit_enable: bool,
    /// Registration of gateways with an unknown EUI.
    pub register_unknown: RegisterUnknown,
    pub default: Defaults,
    /// Direct stations to the stored CUPS URI when they report another.
    #[serde(rename = "allow_cups_uri_update")]
    pub allow_cups_uri_update: bool,
    pub tls: ClientTls,
    pub timeouts: Timeouts,
    pub firmware: Firmware,
    pub the_things_gateway: TheThingsGateway,
}

/// Owner and API key used to register unknown gateways. The API key also
/// authenticates upstream calls for stations that present a gateway token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterUnknown {
    /// `user` or `organization`.
    #[serde(rename = "type")]
    pub owner_type: String,
    #[serde(rename = "id")]
    pub owner_id: String,
    pub api_key: String,
}

impl std::fmt::Debug for RegisterUnknown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterUnknown")
            .field("owner_type", &self.owner_type)
            .field("owner_id", &self.owner_id)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "[REDACTED]" })
            .finish()
    }
}

impl RegisterUnknown {
    /// The owner of registered gateways, when registration is enabled.
    pub fn owner(&self) -> Option<EntityIdentifiers> {
        if self.owner_id.is_empty() {
            return None;
        }
        match self.owner_type.as_str() {
            "user" => Some(EntityIdentifiers::user(self.owner_id.as_str())),
            "organization" => Some(EntityIdentifiers::organization(self.owner_id.as_str())),
            _ => None,
        }
    }

    pub fn fallback_key(&self) -> Option<&str> {
        Some(self.api_key.as_str()).filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// LNS address of gateways that have none.
    pub lns_uri: String,
}

/// TLS client settings used when resolving trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTls {
    /// Trust the roots of the operating system.
    pub system_roots: bool,
    /// Extra root CAs (PEM).
    pub root_ca: Option<PathBuf>,
    /// Trust sent to stations when no server address is known (PEM).
    pub trust: Option<PathBuf>,
}

impl Default for ClientTls {
    fn default() -> Self {
        Self {
            system_roots: true,
            root_ca: None,
            trust: None,
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub request_secs: u64,
    pub dial_secs: u64,
    pub rpc_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: 30,
            dial_secs: 10,
            rpc_secs: 10,
        }
    }
}

impl Timeouts {
    pub const fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub const fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs)
    }

    pub const fn rpc(&self) -> Duration {
        Duration::from_secs(self.rpc_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Firmware {
    /// Root of the update directory tree.
    pub directory: Option<PathBuf>,
    /// Ed25519 signing keys.
    pub signing_keys: Vec<PathBuf>,
}

/// Settings of The Things Gateway endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TheThingsGateway {
    /// Base URL of frequency plan documents, the plan id is appended.
    pub frequency_plan_url: String,
    /// URL of the firmware image.
    pub firmware_url: String,
    /// MQTT server of gateways without gateway server address.
    pub default_mqtt_server: String,
}

impl Default for TheThingsGateway {
    fn default() -> Self {
        Self {
            frequency_plan_url: "https://frequency-plans.lorastack.dev/api/v2/frequency-plans"
                .to_string(),
            firmware_url: "https://firmware.lorastack.dev/the-things-gateway/v1".to_string(),
            default_mqtt_server: String::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid by `path` if given, then by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `LORASTACK_*` overrides read through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = var("LORASTACK_CUPS_REQUIRE_EXPLICIT_ENABLE") {
            self.require_explicit_enable = parse_bool("LORASTACK_CUPS_REQUIRE_EXPLICIT_ENABLE", &v)?;
        }
        if let Some(v) = var("LORASTACK_CUPS_ALLOW_CUPS_URI_UPDATE") {
            self.allow_cups_uri_update = parse_bool("LORASTACK_CUPS_ALLOW_CUPS_URI_UPDATE", &v)?;
        }
        if let Some(v) = var("LORASTACK_CUPS_REGISTER_UNKNOWN_TYPE") {
            self.register_unknown.owner_type = v;
        }
        if let Some(v) = var("LORASTACK_CUPS_REGISTER_UNKNOWN_ID") {
            self.register_unknown.owner_id = v;
        }
        if let Some(v) = var("LORASTACK_CUPS_REGISTER_UNKNOWN_API_KEY") {
            self.register_unknown.api_key = v;
        }
        if let Some(v) = var("LORASTACK_CUPS_DEFAULT_LNS_URI") {
            self.default.lns_uri = v;
        }
        if let Some(v) = var("LORASTACK_CUPS_REQUEST_TIMEOUT") {
            self.timeouts.request_secs = parse_secs("LORASTACK_CUPS_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = var("LORASTACK_CUPS_DIAL_TIMEOUT") {
            self.timeouts.dial_secs = parse_secs("LORASTACK_CUPS_DIAL_TIMEOUT", &v)?;
        }
        if let Some(v) = var("LORASTACK_CUPS_RPC_TIMEOUT") {
            self.timeouts.rpc_secs = parse_secs("LORASTACK_CUPS_RPC_TIMEOUT", &v)?;
        }
        Ok(())
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_secs(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .trim_end_matches('s')
        .parse()
        .map_err(|_| ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert_eq!(config.timeouts.dial(), Duration::from_secs(10));
        assert_eq!(config.timeouts.rpc(), Duration::from_secs(10));
        assert!(config.tls.system_roots);
        assert!(!config.require_explicit_enable);
        assert!(config.register_unknown.owner().is_none());
        assert!(config.register_unknown.fallback_key().is_none());
    }

    #[test]
    fn file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cups.json");
        std::fs::write(
            &path,
            r#"{
                "require_explicit_enable": true,
                "register_unknown": {"type": "organization", "id": "ops", "api_key": "NNSXS.A.B"},
                "default": {"lns_uri": "wss://lns:443"},
                "timeouts": {"dial_secs": 3}
            }"#,
        )
        .unwrap();
        let mut config = ServerConfig::from_file(&path).unwrap();
        assert!(config.require_explicit_enable);
        assert_eq!(
            config.register_unknown.owner(),
            Some(EntityIdentifiers::organization("ops"))
        );
        assert_eq!(config.timeouts.dial_secs, 3);
        assert_eq!(config.timeouts.request_secs, 30);

        let env: HashMap<&str, &str> = [
            ("LORASTACK_CUPS_REQUIRE_EXPLICIT_ENABLE", "false"),
            ("LORASTACK_CUPS_DEFAULT_LNS_URI", "wss://other:8887"),
            ("LORASTACK_CUPS_RPC_TIMEOUT", "5s"),
        ]
        .into();
        config
            .apply_env(|name| env.get(name).map(ToString::to_string))
            .unwrap();
        assert!(!config.require_explicit_enable);
        assert_eq!(config.default.lns_uri, "wss://other:8887");
        assert_eq!(config.timeouts.rpc(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_env_values_are_errors() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(|name| (name == "LORASTACK_CUPS_DIAL_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LORASTACK_CUPS_DIAL_TIMEOUT", .. }));
    }

    #[test]
    fn unreadable_files_are_errors() {
        assert!(matches!(
            ServerConfig::from_file(Path::new("/nonexistent/cups.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn debug_hides_api_key() {
        let register = RegisterUnknown {
            api_key: "NNSXS.SECRET.KEY".to_string(),
            ..RegisterUnknown::default()
        };
        assert!(!format!("{register:?}").contains("SECRET"));
    }
}
