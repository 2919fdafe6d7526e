//! Lorastack Configuration and Update Server
//!
//! Serves LoRa Basic Station gateways polling `POST /update-info`:
//! - Server address and credentials reconciliation against the gateway registry
//! - Trust anchor discovery by dialing the configured servers over TLS
//! - Signed firmware updates
//! - The Things Gateway configuration endpoint

pub mod address;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod firmware;
pub mod http;
pub mod server;
pub mod trust;
pub mod ttg;
pub mod upstream;
pub mod wire;

pub use config::ServerConfig;
pub use server::CupsServer;
pub use upstream::{GatewayAccessClient, GatewayRegistryClient, LocalGatewayService};
pub use wire::{UpdateInfoRequest, UpdateInfoResponse};

/// Register the error definitions of this crate and its dependencies.
pub fn init() {
    lorastack_registry::init();
    errors::register_errors();
}
