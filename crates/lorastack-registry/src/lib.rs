//! Lorastack registries.
//!
//! Domain records ([`Application`], [`EndDevice`], [`Gateway`]) stored in a
//! [`TypedStore`](lorastack_store::TypedStore) through the generic
//! [`Registry`], plus the [`AccessRegistry`] holding API keys and
//! collaborator rights.

pub mod access;
pub mod errors;
pub mod events;
pub mod identifiers;
mod observe;
pub mod records;
pub mod registry;

pub use access::{AccessRegistry, ApiKey, Right, Rights};
pub use events::{Event, EventBus};
pub use identifiers::{
    ApplicationIdentifiers, EndDeviceIdentifiers, EntityIdentifiers, GatewayIdentifiers,
    OrganizationIdentifiers, UserIdentifiers,
};
pub use records::{Application, EndDevice, Gateway, Record, RootKeys, VersionIdentifiers};
pub use registry::{ApplicationRegistry, EndDeviceRegistry, GatewayRegistry, Registry, Stored};

/// Register the error definitions of this crate and its dependencies.
pub fn init() {
    lorastack_store::init();
    errors::register_errors();
    access::register_errors();
}
