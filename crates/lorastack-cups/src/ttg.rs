//! Configuration endpoint of The Things Gateway.
//!
//! The Things Gateway fetches its configuration with its gateway API key as
//! `Authorization: Key <api-key>`. It learns its frequency plan, the MQTT
//! server to connect to and where to download firmware.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lorastack_core::Result;
use lorastack_registry::GatewayIdentifiers;

use crate::address::Address;
use crate::auth::{CallCredentials, key_token};
use crate::errors::{ERR_CORRUPT_ATTRIBUTE, ERR_UNAUTHENTICATED};
use crate::server::{CupsServer, attributes, now_rfc3339};

const FIELDS: &[&str] = &[
    "attributes",
    "frequency_plan_id",
    "gateway_server_address",
    "auto_update",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: String,
    pub mqtt_address: String,
}

/// Response of `GET /api/v2/gateways/{gateway_id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub frequency_plan: String,
    pub frequency_plan_url: String,
    pub router: Router,
    pub auto_update: bool,
    pub firmware_url: String,
}

impl CupsServer {
    /// Configuration of The Things Gateway `gateway_id`.
    #[instrument(skip(self, authorization))]
    pub async fn the_things_gateway_info(
        &self,
        authorization: Option<&str>,
        gateway_id: &str,
    ) -> Result<GatewayInfo> {
        let header = authorization
            .filter(|h| key_token(h).is_some_and(|k| !k.is_empty()))
            .ok_or_else(|| ERR_UNAUTHENTICATED.with_attribute("gateway_eui", gateway_id))?;
        let call = CallCredentials::Forwarded(header.trim().to_string());

        let ids = GatewayIdentifiers::new(gateway_id);
        ids.validate()?;
        let mut gateway = self.rpc(self.registry().get(&call, &ids, FIELDS)).await?;

        let settings = &self.config().the_things_gateway;
        let address = if gateway.gateway_server_address.is_empty() {
            settings.default_mqtt_server.as_str()
        } else {
            gateway.gateway_server_address.as_str()
        };
        let mqtt_address = if address.is_empty() {
            String::new()
        } else {
            Address::parse(address, "mqtts")
                .map_err(|e| {
                    ERR_CORRUPT_ATTRIBUTE
                        .with_attributes([
                            ("attribute", "gateway_server_address"),
                            ("gateway_uid", gateway_id),
                        ])
                        .with_cause(e)
                })?
                .to_string()
        };
        let info = GatewayInfo {
            frequency_plan: gateway.frequency_plan_id.clone(),
            frequency_plan_url: if gateway.frequency_plan_id.is_empty() {
                String::new()
            } else {
                format!(
                    "{}/{}",
                    settings.frequency_plan_url.trim_end_matches('/'),
                    gateway.frequency_plan_id
                )
            },
            router: Router {
                id: gateway_id.to_string(),
                mqtt_address,
            },
            auto_update: gateway.auto_update,
            firmware_url: settings.firmware_url.clone(),
        };

        gateway
            .attributes
            .insert(attributes::CUPS_LAST_SEEN.to_string(), now_rfc3339());
        self.rpc(self.registry().update(&call, gateway, &["attributes"]))
            .await?;
        debug!(frequency_plan = %info.frequency_plan, "Served gateway info");
        Ok(info)
    }
}
