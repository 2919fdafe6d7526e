//! Lorastack Core Library
//!
//! Shared functionality for Lorastack components:
//! - Domain error model with gRPC / HTTP mapping
//! - i18n message bundle for error message formats
//! - EUI-64 and identifier primitives
//! - Tracing and metrics initialisation

pub mod errors;
pub mod eui;
pub mod i18n;
pub mod ids;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;

pub use errors::{Definition, Error, Result};
pub use eui::Eui64;

/// Register the error definitions of this crate.
///
/// Binaries call this (through the `init` of every crate they link) before
/// any handler runs.
pub fn init() {
    errors::canonical::register_errors();
    eui::register_errors();
    ids::register_errors();
}
