//! Collaborators the configuration server calls for every request.
//!
//! The server never touches the gateway registry or the access registry
//! directly. [`LocalGatewayService`] implements both clients on top of
//! in-process registries and enforces rights the way a remote identity
//! server would.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use lorastack_core::{Eui64, Result};
use lorastack_registry::{
    AccessRegistry, ApiKey, EntityIdentifiers, Gateway, GatewayIdentifiers, GatewayRegistry, Right,
};

use crate::auth::CallCredentials;

/// Gateway registry operations used by the configuration server.
#[async_trait]
pub trait GatewayRegistryClient: Send + Sync {
    async fn get_identifiers_for_eui(
        &self,
        credentials: &CallCredentials,
        eui: Eui64,
    ) -> Result<GatewayIdentifiers>;

    /// Register `gateway` with `owner` as collaborator.
    async fn create(
        &self,
        credentials: &CallCredentials,
        owner: &EntityIdentifiers,
        gateway: Gateway,
    ) -> Result<Gateway>;

    async fn get(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        fields: &[&str],
    ) -> Result<Gateway>;

    /// Write the `fields` of `gateway`.
    async fn update(
        &self,
        credentials: &CallCredentials,
        gateway: Gateway,
        fields: &[&str],
    ) -> Result<Gateway>;
}

/// Gateway API key operations used by the configuration server.
#[async_trait]
pub trait GatewayAccessClient: Send + Sync {
    /// Issue an API key for the gateway. Returns the key and its token.
    async fn create_api_key(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        name: &str,
        rights: &[Right],
    ) -> Result<(ApiKey, String)>;
}

/// Both clients, backed by registries in this process.
#[derive(Debug, Clone)]
pub struct LocalGatewayService {
    gateways: Arc<GatewayRegistry>,
    access: Arc<AccessRegistry>,
}

impl LocalGatewayService {
    pub const fn new(gateways: Arc<GatewayRegistry>, access: Arc<AccessRegistry>) -> Self {
        Self { gateways, access }
    }

    pub const fn gateways(&self) -> &Arc<GatewayRegistry> {
        &self.gateways
    }

    pub const fn access(&self) -> &Arc<AccessRegistry> {
        &self.access
    }

    async fn authorize(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        rights: &[Right],
    ) -> Result<ApiKey> {
        let entity = EntityIdentifiers::from(GatewayIdentifiers::new(ids.gateway_id.as_str()));
        self.access
            .authorize(credentials.token(), &entity, rights)
            .await
    }
}

#[async_trait]
impl GatewayRegistryClient for LocalGatewayService {
    async fn get_identifiers_for_eui(
        &self,
        credentials: &CallCredentials,
        eui: Eui64,
    ) -> Result<GatewayIdentifiers> {
        self.access.authenticate(credentials.token()).await?;
        self.gateways.get_identifiers_for_eui(eui).await
    }

    async fn create(
        &self,
        credentials: &CallCredentials,
        owner: &EntityIdentifiers,
        gateway: Gateway,
    ) -> Result<Gateway> {
        self.access
            .authorize(credentials.token(), owner, &[Right::GatewayAll])
            .await?;
        let created = self.gateways.create(gateway, &[]).await?;
        let entity = EntityIdentifiers::from(GatewayIdentifiers::new(created.ids.gateway_id.as_str()));
        self.access
            .set_collaborator(&entity, owner, &[Right::GatewayAll])
            .await?;
        info!(gateway_id = %created.ids, owner = %owner, "Gateway registered");
        Ok(created.into_record())
    }

    async fn get(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        fields: &[&str],
    ) -> Result<Gateway> {
        // Attributes hold credentials.
        let rights: &[Right] = if fields.is_empty() || fields.contains(&"attributes") {
            &[Right::GatewayInfo, Right::GatewaySettingsBasic]
        } else {
            &[Right::GatewayInfo]
        };
        self.authorize(credentials, ids, rights).await?;
        Ok(self
            .gateways
            .get_by_id(&ids.gateway_id, fields)
            .await?
            .into_record())
    }

    async fn update(
        &self,
        credentials: &CallCredentials,
        gateway: Gateway,
        fields: &[&str],
    ) -> Result<Gateway> {
        self.authorize(credentials, &gateway.ids, &[Right::GatewaySettingsBasic])
            .await?;
        let mut stored = self.gateways.get_by_id(&gateway.ids.gateway_id, &[]).await?;
        let ids = stored.ids.clone();
        *stored.record_mut() = Gateway { ids, ..gateway };
        self.gateways.store(&mut stored, fields).await?;
        debug!(gateway_id = %stored.ids, ?fields, "Gateway updated");
        Ok(stored.into_record())
    }
}

#[async_trait]
impl GatewayAccessClient for LocalGatewayService {
    async fn create_api_key(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        name: &str,
        rights: &[Right],
    ) -> Result<(ApiKey, String)> {
        self.authorize(credentials, ids, &[Right::GatewaySettingsApiKeys])
            .await?;
        // Keys cannot carry rights the caller lacks.
        self.authorize(credentials, ids, rights).await?;
        let entity = EntityIdentifiers::from(GatewayIdentifiers::new(ids.gateway_id.as_str()));
        self.access.create_api_key(&entity, name, rights).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lorastack_core::errors::{is_permission_denied, is_unauthenticated};
    use lorastack_registry::EventBus;

    use super::*;

    async fn service() -> (LocalGatewayService, CallCredentials) {
        lorastack_registry::init();
        let service = LocalGatewayService::new(
            Arc::new(GatewayRegistry::in_memory(EventBus::new())),
            Arc::new(AccessRegistry::in_memory()),
        );
        let (_, token) = service
            .access()
            .create_api_key(&EntityIdentifiers::user("admin"), "registration", &[Right::GatewayAll])
            .await
            .unwrap();
        (service, CallCredentials::Fallback(token))
    }

    fn gateway() -> Gateway {
        Gateway {
            ids: GatewayIdentifiers::from_eui(Eui64::from_u64(0x58a0_cbff_fe80_0019)),
            ..Gateway::default()
        }
    }

    #[tokio::test]
    async fn owner_key_manages_registered_gateway() {
        let (service, creds) = service().await;
        let owner = EntityIdentifiers::user("admin");
        let created = service.create(&creds, &owner, gateway()).await.unwrap();

        let ids = service
            .get_identifiers_for_eui(&creds, Eui64::from_u64(0x58a0_cbff_fe80_0019))
            .await
            .unwrap();
        assert_eq!(ids, created.ids);

        let mut gw = service.get(&creds, &ids, &["attributes"]).await.unwrap();
        gw.attributes.insert("_cups".to_string(), "true".to_string());
        service.update(&creds, gw, &["attributes"]).await.unwrap();
        let gw = service.get(&creds, &ids, &[]).await.unwrap();
        assert_eq!(gw.attribute("_cups"), "true");

        let (key, token) = service
            .create_api_key(&creds, &ids, "cups", &[Right::GatewayInfo, Right::GatewayLink])
            .await
            .unwrap();
        assert_eq!(key.entity, EntityIdentifiers::from(GatewayIdentifiers::new(ids.gateway_id.as_str())));

        // The gateway key reads settings but no attributes, and cannot
        // mint further keys.
        let gateway_creds = CallCredentials::Forwarded(format!("Bearer {token}"));
        let gw = service
            .get(&gateway_creds, &ids, &["frequency_plan_id"])
            .await
            .unwrap();
        assert!(gw.attributes.is_empty());
        let err = service
            .get(&gateway_creds, &ids, &[])
            .await
            .unwrap_err();
        assert!(is_permission_denied(&err));
        let err = service
            .create_api_key(&gateway_creds, &ids, "more", &[Right::GatewayInfo])
            .await
            .unwrap_err();
        assert!(is_permission_denied(&err));
    }

    #[tokio::test]
    async fn registration_requires_all_rights_on_owner() {
        let (service, _) = service().await;
        let owner = EntityIdentifiers::user("admin");
        let (_, weak) = service
            .access()
            .create_api_key(&owner, "weak", &[Right::GatewayInfo])
            .await
            .unwrap();
        let err = service
            .create(&CallCredentials::Fallback(weak), &owner, gateway())
            .await
            .unwrap_err();
        assert!(is_permission_denied(&err));
    }

    #[tokio::test]
    async fn unknown_keys_are_unauthenticated() {
        let (service, _) = service().await;
        let creds = CallCredentials::Fallback("NNSXS.UNKNOWN.SECRET".to_string());
        let err = service
            .get_identifiers_for_eui(&creds, Eui64::from_u64(1))
            .await
            .unwrap_err();
        assert!(is_unauthenticated(&err));
    }
}
