//! Process-wide registry of error definitions.

use std::collections::BTreeMap;
use std::sync::{LazyLock, RwLock};

use super::definition::Definition;

type Definitions = BTreeMap<(&'static str, &'static str), &'static Definition>;

static DEFINITIONS: LazyLock<RwLock<Definitions>> = LazyLock::new(|| RwLock::new(BTreeMap::new()));

/// Register a definition and define its message format in the i18n bundle.
///
/// Registering the same definition twice is a no-op.
///
/// # Panics
///
/// Panics when a different definition is already registered under the same
/// namespace and name.
#[allow(clippy::panic)]
pub fn register(definition: &'static Definition) {
    let key = (definition.namespace(), definition.name());
    {
        let mut defs = DEFINITIONS
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = defs.get(&key) {
            if std::ptr::eq(*existing, definition) {
                return;
            }
            panic!(
                "error definition error:{}:{} registered twice",
                definition.namespace(),
                definition.name()
            );
        }
        defs.insert(key, definition);
    }
    crate::i18n::define(
        &definition.message_id(),
        definition.message_format(),
        definition.namespace(),
    );
}

/// Look up a registered definition.
pub fn lookup(namespace: &str, name: &str) -> Option<&'static Definition> {
    let defs = DEFINITIONS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    defs.iter()
        .find(|((ns, n), _)| *ns == namespace && *n == name)
        .map(|(_, d)| *d)
}

/// All registered definitions, ordered by namespace and name.
pub fn registered() -> Vec<&'static Definition> {
    DEFINITIONS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .values()
        .copied()
        .collect()
}
