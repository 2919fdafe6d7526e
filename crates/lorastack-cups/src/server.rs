//! The update-info handler.
//!
//! A station polls with what it currently runs. The handler looks up (or
//! registers) its gateway, reconciles server addresses and credentials
//! against what the station reports, attaches a signed firmware update if
//! one is due, and records the poll on the gateway.

use std::future::Future;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

use lorastack_core::Result;
use lorastack_core::errors::{canonical, is_already_exists, is_not_found};
use lorastack_registry::{Gateway, GatewayIdentifiers, Right};

use crate::address;
use crate::auth::{self, CallCredentials, Selected};
use crate::config::ServerConfig;
use crate::credentials;
use crate::errors::{
    ERR_CORRUPT_ATTRIBUTE, ERR_CUPS_NOT_ENABLED, ERR_GATEWAY_EUI_MISMATCH, ERR_INVALID_TOKEN,
    ERR_UNAUTHENTICATED,
};
use crate::firmware::{Signers, UpdateQuery, UpdateResolver, UpdateSigner};
use crate::trust::TrustResolver;
use crate::upstream::{GatewayAccessClient, GatewayRegistryClient};
use crate::wire::{UpdateInfoRequest, UpdateInfoResponse};

/// Gateway attributes holding configuration server state.
pub mod attributes {
    pub const CUPS: &str = "_cups";
    pub const CUPS_URI: &str = "_cups_uri";
    pub const CUPS_LAST_SEEN: &str = "_cups_last_seen";
    pub const CUPS_STATION: &str = "_cups_station";
    pub const CUPS_MODEL: &str = "_cups_model";
    pub const CUPS_PACKAGE: &str = "_cups_package";
    pub const CUPS_CREDENTIALS_ID: &str = "_cups_credentials_id";
    pub const CUPS_CREDENTIALS: &str = "_cups_credentials";
    pub const CUPS_CREDENTIALS_CRC: &str = "_cups_credentials_crc";
    pub const LNS_CREDENTIALS_ID: &str = "_lns_credentials_id";
    pub const LNS_CREDENTIALS: &str = "_lns_credentials";
    pub const LNS_CREDENTIALS_CRC: &str = "_lns_credentials_crc";
}

use attributes as attr;

/// Fields read from the registry for every poll.
pub const GATEWAY_FIELDS: &[&str] = &[
    "attributes",
    "version_ids",
    "gateway_server_address",
    "auto_update",
    "update_channel",
    "frequency_plan_id",
];

/// Where a minted API key and the CRC of its last emitted blob are kept.
struct CredentialSlot {
    kind: &'static str,
    id: &'static str,
    key: &'static str,
    crc: &'static str,
    rights: &'static [Right],
}

const CUPS_SLOT: CredentialSlot = CredentialSlot {
    kind: "cups",
    id: attr::CUPS_CREDENTIALS_ID,
    key: attr::CUPS_CREDENTIALS,
    crc: attr::CUPS_CREDENTIALS_CRC,
    rights: &[
        Right::GatewayInfo,
        Right::GatewaySettingsBasic,
        Right::GatewaySettingsApiKeys,
        Right::GatewayLink,
    ],
};

const LNS_SLOT: CredentialSlot = CredentialSlot {
    kind: "lns",
    id: attr::LNS_CREDENTIALS_ID,
    key: attr::LNS_CREDENTIALS,
    crc: attr::LNS_CREDENTIALS_CRC,
    rights: &[Right::GatewayInfo, Right::GatewayLink],
};

/// Boolean attribute values, as strconv-style literals.
pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes" | "on"
    )
}

/// RFC 3339 timestamp stored in `_cups_last_seen`.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The configuration server.
pub struct CupsServer {
    config: ServerConfig,
    registry: Arc<dyn GatewayRegistryClient>,
    access: Arc<dyn GatewayAccessClient>,
    trust: Arc<dyn TrustResolver>,
    updates: Option<Arc<dyn UpdateResolver>>,
    signers: Signers,
}

impl std::fmt::Debug for CupsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CupsServer")
            .field("config", &self.config)
            .field("updates", &self.updates.is_some())
            .field("signers", &self.signers)
            .finish_non_exhaustive()
    }
}

impl CupsServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<dyn GatewayRegistryClient>,
        access: Arc<dyn GatewayAccessClient>,
        trust: Arc<dyn TrustResolver>,
    ) -> Self {
        Self {
            config,
            registry,
            access,
            trust,
            updates: None,
            signers: Signers::default(),
        }
    }

    #[must_use]
    pub fn with_update_resolver(mut self, updates: Arc<dyn UpdateResolver>) -> Self {
        self.updates = Some(updates);
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn UpdateSigner>) -> Self {
        self.signers.insert(signer);
        self
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &dyn GatewayRegistryClient {
        self.registry.as_ref()
    }

    /// Run an upstream call under the RPC timeout.
    pub(crate) async fn rpc<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.timeouts.rpc(), call)
            .await
            .map_err(|_| canonical::deadline_exceeded())?
    }

    /// Handle a poll of a station authenticated with `authorization`.
    #[instrument(skip_all, fields(gateway_eui = %req.router, station = %req.station))]
    pub async fn update_info(
        &self,
        authorization: Option<&str>,
        req: &UpdateInfoRequest,
    ) -> Result<UpdateInfoResponse> {
        let selected = auth::select(authorization, self.config.register_unknown.fallback_key())
            .ok_or_else(|| ERR_UNAUTHENTICATED.with_attribute("gateway_eui", req.router.to_string()))?;
        let call = &selected.call;

        let ids = self.lookup(&selected, req).await?;
        let mut gateway = self.rpc(self.registry.get(call, &ids, GATEWAY_FIELDS)).await?;
        let uid = gateway.ids.gateway_id.clone();

        if gateway.ids.eui != Some(req.router) {
            return Err(ERR_GATEWAY_EUI_MISMATCH.with_attributes([
                ("gateway_uid", uid.clone()),
                ("gateway_eui", req.router.to_string()),
            ]));
        }
        if self.config.require_explicit_enable && !is_truthy(gateway.attribute(attr::CUPS)) {
            return Err(ERR_CUPS_NOT_ENABLED.with_attribute("gateway_uid", uid));
        }
        if let Some(presented) = &selected.presented {
            self.check_token(&mut gateway, presented)?;
        }

        let mut res = UpdateInfoResponse::default();

        let stored_cups_uri = gateway.attribute(attr::CUPS_URI).to_string();
        if stored_cups_uri.is_empty() {
            if !req.cups_uri.is_empty() {
                gateway
                    .attributes
                    .insert(attr::CUPS_URI.to_string(), req.cups_uri.clone());
            }
        } else if self.config.allow_cups_uri_update && stored_cups_uri != req.cups_uri {
            debug!(from = %req.cups_uri, to = %stored_cups_uri, "Directing station to CUPS URI");
            res.cups_uri = stored_cups_uri;
        }

        let lns_address = self.lns_address(&gateway)?;
        if let Some(uri) = &lns_address {
            if *uri != req.lns_uri {
                debug!(from = %req.lns_uri, to = %uri, "Directing station to LNS URI");
                res.lns_uri = uri.clone();
            }
        }

        if gateway.attribute(attr::CUPS_CREDENTIALS_CRC) != req.cups_cred_crc.to_string() {
            let address = gateway.attribute(attr::CUPS_URI).to_string();
            if let Some(blob) = self.reissue(call, &mut gateway, &CUPS_SLOT, &address).await? {
                res.cups_credentials = blob;
            }
        }
        if let Some(uri) = &lns_address {
            if gateway.attribute(attr::LNS_CREDENTIALS_CRC) != req.lns_cred_crc.to_string() {
                if let Some(blob) = self.reissue(call, &mut gateway, &LNS_SLOT, uri).await? {
                    res.lns_credentials = blob;
                }
            }
        }

        if gateway.auto_update {
            self.attach_update(&gateway, req, &mut res).await?;
        }

        gateway
            .attributes
            .insert(attr::CUPS_LAST_SEEN.to_string(), now_rfc3339());
        for (key, value) in [
            (attr::CUPS_STATION, &req.station),
            (attr::CUPS_MODEL, &req.model),
            (attr::CUPS_PACKAGE, &req.package),
        ] {
            if !value.is_empty() {
                gateway.attributes.insert(key.to_string(), value.clone());
            }
        }
        self.rpc(self.registry.update(call, gateway, &["attributes"]))
            .await?;

        info!(
            gateway_uid = %uid,
            cups_uri = !res.cups_uri.is_empty(),
            lns_uri = !res.lns_uri.is_empty(),
            cups_credentials = !res.cups_credentials.is_empty(),
            lns_credentials = !res.lns_credentials.is_empty(),
            update = !res.update_data.is_empty(),
            "Served update info"
        );
        Ok(res)
    }

    /// Identifiers of the gateway with the station's EUI, registering it
    /// when unknown and registration is enabled.
    async fn lookup(&self, selected: &Selected, req: &UpdateInfoRequest) -> Result<GatewayIdentifiers> {
        let call = &selected.call;
        let owner = match self.rpc(self.registry.get_identifiers_for_eui(call, req.router)).await {
            Ok(ids) => return Ok(ids),
            Err(err) if !is_not_found(&err) => return Err(err),
            Err(err) => match self.config.register_unknown.owner() {
                Some(owner) => owner,
                None => {
                    debug!("Unknown gateway and registration disabled");
                    return Err(err);
                }
            },
        };
        match self
            .rpc(self.registry.create(call, &owner, self.new_gateway(selected, req)))
            .await
        {
            Ok(created) => {
                info!(gateway_uid = %created.ids, owner = %owner, "Registered unknown gateway");
                Ok(created.ids)
            }
            // Registered by a concurrent poll.
            Err(err) if is_already_exists(&err) => {
                self.rpc(self.registry.get_identifiers_for_eui(call, req.router))
                    .await
            }
            Err(err) => Err(err),
        }
    }

    fn new_gateway(&self, selected: &Selected, req: &UpdateInfoRequest) -> Gateway {
        let mut gateway = Gateway {
            ids: GatewayIdentifiers::from_eui(req.router),
            name: format!("Station {}", req.router.to_id6()),
            gateway_server_address: if self.config.default.lns_uri.is_empty() {
                req.lns_uri.clone()
            } else {
                self.config.default.lns_uri.clone()
            },
            ..Gateway::default()
        };
        gateway
            .attributes
            .insert(attr::CUPS.to_string(), "true".to_string());
        if !req.cups_uri.is_empty() {
            gateway
                .attributes
                .insert(attr::CUPS_URI.to_string(), req.cups_uri.clone());
        }
        if let Some(presented) = &selected.presented {
            gateway
                .attributes
                .insert(attr::CUPS_CREDENTIALS.to_string(), presented.clone());
        }
        gateway
    }

    /// Compare a presented gateway token with the stored CUPS credentials.
    /// A gateway without stored credentials enrolls the token, but only
    /// when unknown gateways may register.
    fn check_token(&self, gateway: &mut Gateway, presented: &str) -> Result<()> {
        let invalid = || ERR_INVALID_TOKEN.with_attribute("gateway_uid", gateway.ids.gateway_id.as_str());
        let stored = gateway.attribute(attr::CUPS_CREDENTIALS);
        if stored.is_empty() {
            if self.config.register_unknown.owner().is_none() {
                return Err(invalid());
            }
            gateway
                .attributes
                .insert(attr::CUPS_CREDENTIALS.to_string(), presented.to_string());
            return Ok(());
        }
        if bool::from(stored.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(())
        } else {
            Err(invalid())
        }
    }

    /// The LNS URI of a gateway, from its server address or the default.
    fn lns_address(&self, gateway: &Gateway) -> Result<Option<String>> {
        let address = if gateway.gateway_server_address.is_empty() {
            self.config.default.lns_uri.as_str()
        } else {
            gateway.gateway_server_address.as_str()
        };
        if address.is_empty() {
            return Ok(None);
        }
        address::lns_uri(address).map(Some).map_err(|e| {
            ERR_CORRUPT_ATTRIBUTE
                .with_attributes([
                    ("attribute", "gateway_server_address"),
                    ("gateway_uid", gateway.ids.gateway_id.as_str()),
                ])
                .with_cause(e)
        })
    }

    /// Build a credentials blob for `slot`, minting an API key first if the
    /// gateway has none. Without trust for `address` nothing is emitted and
    /// the stored CRC is dropped, so the next poll tries again.
    async fn reissue(
        &self,
        call: &CallCredentials,
        gateway: &mut Gateway,
        slot: &CredentialSlot,
        address: &str,
    ) -> Result<Option<Vec<u8>>> {
        if gateway.attribute(slot.key).is_empty() {
            let name = format!("{} credentials {}", slot.kind.to_uppercase(), now_rfc3339());
            let (key, token) = self
                .rpc(self.access.create_api_key(call, &gateway.ids, &name, slot.rights))
                .await?;
            info!(gateway_uid = %gateway.ids, kind = slot.kind, key_id = %key.id, "Issued credentials");
            gateway.attributes.insert(slot.id.to_string(), key.id);
            gateway.attributes.insert(slot.key.to_string(), token);
        }

        let trust = match self.trust.resolve(address).await {
            Ok(trust) => trust,
            Err(err) => {
                warn!(gateway_uid = %gateway.ids, kind = slot.kind, address, error = %err, "No trust for server, skipping credentials");
                gateway.attributes.remove(slot.crc);
                return Ok(None);
            }
        };
        let blob = credentials::bearer_blob(&trust, gateway.attribute(slot.key));
        let crc = credentials::crc(&blob);
        debug!(kind = slot.kind, crc, "Emitting credentials");
        gateway.attributes.insert(slot.crc.to_string(), crc.to_string());
        Ok(Some(blob))
    }

    /// Attach a signed update for the station, if one is due and signed by a
    /// key the station knows.
    async fn attach_update(
        &self,
        gateway: &Gateway,
        req: &UpdateInfoRequest,
        res: &mut UpdateInfoResponse,
    ) -> Result<()> {
        let Some(updates) = &self.updates else {
            return Ok(());
        };
        let query = UpdateQuery {
            station: req.station.clone(),
            model: req.model.clone(),
            package: req.package.clone(),
            version_ids: gateway.version_ids.clone(),
            update_channel: gateway.update_channel.clone(),
        };
        let data = match updates.resolve(&query).await {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!(gateway_uid = %gateway.ids, error = %err, "Failed to resolve update");
                return Ok(());
            }
        };
        let Some((key_crc, signer)) = self.signers.first_of(&req.keys) else {
            warn!(gateway_uid = %gateway.ids, keys = ?req.keys, "No signer for any key of station");
            return Ok(());
        };
        res.signature = signer.sign(&Sha512::digest(&data))?;
        res.signature_key_crc = key_crc;
        res.update_data = data;
        info!(gateway_uid = %gateway.ids, key_crc, size = res.update_data.len(), "Attached update");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn truthy_attribute_values() {
        for v in ["true", "TRUE", "1", "t", "yes"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["", "false", "0", "no", "enabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn slots_carry_distinct_rights() {
        assert!(CUPS_SLOT.rights.contains(&Right::GatewaySettingsApiKeys));
        assert!(!LNS_SLOT.rights.contains(&Right::GatewaySettingsApiKeys));
        assert!(LNS_SLOT.rights.contains(&Right::GatewayLink));
    }
}
