#![allow(clippy::unwrap_used, dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lorastack_core::{Eui64, Result};
use lorastack_cups::auth::CallCredentials;
use lorastack_cups::errors::ERR_NO_TRUST;
use lorastack_cups::trust::{StaticTrust, TrustResolver};
use lorastack_cups::{CupsServer, GatewayRegistryClient, LocalGatewayService, ServerConfig};
use lorastack_registry::{
    AccessRegistry, EntityIdentifiers, EventBus, Gateway, GatewayIdentifiers, GatewayRegistry,
    Right,
};

pub const EUI: u64 = 0x58a0_cbff_fe80_0019;
pub const GATEWAY_ID: &str = "eui-58a0cbfffe800019";
pub const TRUST: &[u8] = b"trust-anchor-der";

pub struct Harness {
    pub service: Arc<LocalGatewayService>,
    /// Token of an API key of user `admin` with all gateway rights.
    pub admin_key: String,
}

impl Harness {
    pub async fn new() -> Self {
        lorastack_cups::init();
        let service = Arc::new(LocalGatewayService::new(
            Arc::new(GatewayRegistry::in_memory(EventBus::new())),
            Arc::new(AccessRegistry::in_memory()),
        ));
        let (_, admin_key) = service
            .access()
            .create_api_key(&EntityIdentifiers::user("admin"), "cups", &[Right::GatewayAll])
            .await
            .unwrap();
        Self { service, admin_key }
    }

    /// Configuration registering unknown gateways for `admin`.
    pub fn config(&self) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.register_unknown.owner_type = "user".to_string();
        config.register_unknown.owner_id = "admin".to_string();
        config.register_unknown.api_key = self.admin_key.clone();
        config.default.lns_uri = "wss://lns:443".to_string();
        config
    }

    pub fn server(&self, config: ServerConfig) -> CupsServer {
        self.server_with_trust(config, Arc::new(StaticTrust(Some(TRUST.to_vec()))))
    }

    /// Server calling the gateway registry through `registry`.
    pub fn server_with_registry(
        &self,
        config: ServerConfig,
        registry: Arc<dyn GatewayRegistryClient>,
    ) -> CupsServer {
        CupsServer::new(
            config,
            registry,
            self.service.clone(),
            Arc::new(StaticTrust(Some(TRUST.to_vec()))),
        )
    }

    /// Registry whose `operation` calls stall for `delay` first.
    pub fn slow(&self, operation: &'static str, delay: Duration) -> Arc<SlowRegistry> {
        Arc::new(SlowRegistry {
            inner: self.service.clone(),
            operation,
            delay,
        })
    }

    pub fn server_with_trust(&self, config: ServerConfig, trust: Arc<dyn TrustResolver>) -> CupsServer {
        CupsServer::new(config, self.service.clone(), self.service.clone(), trust)
    }

    /// Register a gateway owned by `admin` with the given attributes.
    pub async fn register(&self, attributes: &[(&str, &str)], customize: impl FnOnce(&mut Gateway)) -> Gateway {
        let mut gateway = Gateway {
            ids: GatewayIdentifiers::from_eui(Eui64::from_u64(EUI)),
            gateway_server_address: "wss://lns:443".to_string(),
            ..Gateway::default()
        };
        for (k, v) in attributes {
            gateway.attributes.insert((*k).to_string(), (*v).to_string());
        }
        customize(&mut gateway);
        self.service
            .create(
                &CallCredentials::Fallback(self.admin_key.clone()),
                &EntityIdentifiers::user("admin"),
                gateway,
            )
            .await
            .unwrap()
    }

    pub async fn stored(&self) -> Gateway {
        self.service
            .gateways()
            .get_by_id(GATEWAY_ID, &[])
            .await
            .unwrap()
            .into_record()
    }
}

/// Trust for every address except one.
pub struct FailingFor(pub &'static str);

#[async_trait]
impl TrustResolver for FailingFor {
    async fn resolve(&self, address: &str) -> Result<Vec<u8>> {
        if address == self.0 {
            return Err(ERR_NO_TRUST.with_attribute("address", address));
        }
        Ok(TRUST.to_vec())
    }
}

/// Gateway registry that stalls one kind of call.
pub struct SlowRegistry {
    inner: Arc<LocalGatewayService>,
    operation: &'static str,
    delay: Duration,
}

impl SlowRegistry {
    async fn stall(&self, operation: &str) {
        if operation == self.operation {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl GatewayRegistryClient for SlowRegistry {
    async fn get_identifiers_for_eui(
        &self,
        credentials: &CallCredentials,
        eui: Eui64,
    ) -> Result<GatewayIdentifiers> {
        self.stall("get_identifiers_for_eui").await;
        self.inner.get_identifiers_for_eui(credentials, eui).await
    }

    async fn create(
        &self,
        credentials: &CallCredentials,
        owner: &EntityIdentifiers,
        gateway: Gateway,
    ) -> Result<Gateway> {
        self.stall("create").await;
        self.inner.create(credentials, owner, gateway).await
    }

    async fn get(
        &self,
        credentials: &CallCredentials,
        ids: &GatewayIdentifiers,
        fields: &[&str],
    ) -> Result<Gateway> {
        self.stall("get").await;
        self.inner.get(credentials, ids, fields).await
    }

    async fn update(
        &self,
        credentials: &CallCredentials,
        gateway: Gateway,
        fields: &[&str],
    ) -> Result<Gateway> {
        self.stall("update").await;
        self.inner.update(credentials, gateway, fields).await
    }
}
