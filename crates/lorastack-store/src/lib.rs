//! Lorastack storage substrate.
//!
//! Records are stored as flat maps from field paths to leaves, either typed
//! ([`TypedStore`], leaves are [`Value`]s) or as tagged bytes
//! ([`ByteStore`]). [`TypedStoreAdapter`] bridges a byte store to the typed
//! shape.
//!
//! Backends:
//! - [`MemoryStore`]: byte store in a map
//! - [`IndexedStore`]: typed store with secondary indexes on chosen fields
//! - [`SqliteStore`]: byte store on `SQLite`

pub mod adapter;
pub mod codec;
pub mod errors;
pub mod flatten;
pub mod indexed;
pub mod key;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod value;

pub use adapter::TypedStoreAdapter;
pub use flatten::{Diff, Fields};
pub use indexed::IndexedStore;
pub use key::Key;
pub use memory::MemoryStore;
pub use sqlite::{Database, DatabaseError, SqliteStore};
pub use store::{ByteStore, TypedStore};
pub use value::{Value, from_value, to_value};

/// Register the error definitions of this crate and its dependencies.
pub fn init() {
    lorastack_core::init();
    errors::register_errors();
}
