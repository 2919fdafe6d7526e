//! Message bundle for translating message formats.
//!
//! Every registered error definition defines its message format here under
//! the id `error:<namespace>:<name>`, with English as the source language.
//! Translations are merged from a JSON file of the shape
//!
//! ```json
//! {
//!   "error:pkg/cups:cups_not_enabled": {
//!     "translations": { "en": "CUPS is not enabled", "ja": "..." },
//!     "description": { "package": "pkg/cups" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{LazyLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, format_message};

/// Source language of all message formats.
pub const SOURCE_LANGUAGE: &str = "en";

/// Errors from loading or writing a message bundle.
#[derive(Debug, thiserror::Error)]
pub enum I18nError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a message is defined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub package: String,
}

/// A message with its translations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Description,
    /// Defined by code in this process.
    #[serde(skip)]
    touched: bool,
}

impl Message {
    pub fn source(&self) -> Option<&str> {
        self.translations.get(SOURCE_LANGUAGE).map(String::as_str)
    }
}

/// A set of messages keyed by message id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBundle {
    messages: BTreeMap<String, Message>,
}

impl MessageBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the source text of a message.
    ///
    /// When the source text changes, existing translations are dropped since
    /// they no longer match. Returns whether the bundle changed.
    pub fn define(&mut self, id: &str, source: &str, package: &str) -> bool {
        let message = self.messages.entry(id.to_string()).or_default();
        message.touched = true;
        message.description.package = package.to_string();
        if message.source() == Some(source) {
            return false;
        }
        message.translations.clear();
        message
            .translations
            .insert(SOURCE_LANGUAGE.to_string(), source.to_string());
        true
    }

    /// Set a translation of an existing message.
    ///
    /// Returns `false` if the message is unknown.
    pub fn set_translation(&mut self, id: &str, language: &str, text: &str) -> bool {
        let Some(message) = self.messages.get_mut(id) else {
            return false;
        };
        message
            .translations
            .insert(language.to_string(), text.to_string());
        true
    }

    /// Translate a message, falling back to the source language.
    pub fn translate(&self, id: &str, language: &str) -> Option<&str> {
        let message = self.messages.get(id)?;
        message
            .translations
            .get(language)
            .or_else(|| message.translations.get(SOURCE_LANGUAGE))
            .map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Merge translations from `other`.
    ///
    /// Source texts defined in this bundle win; translations of `other` are
    /// only kept when its source text matches.
    pub fn merge(&mut self, other: Self) {
        for (id, incoming) in other.messages {
            match self.messages.get_mut(&id) {
                Some(existing) if existing.source() == incoming.source() => {
                    for (lang, text) in incoming.translations {
                        existing.translations.entry(lang).or_insert(text);
                    }
                }
                Some(_) => {}
                None => {
                    self.messages.insert(id, incoming);
                }
            }
        }
    }

    /// Drop messages that were not defined in this process.
    ///
    /// Returns the number of removed messages.
    pub fn cleanup(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|_, m| m.touched);
        before - self.messages.len()
    }

    /// Load a bundle from a JSON file.
    pub fn read_file(path: &Path) -> Result<Self, I18nError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the bundle as pretty-printed JSON.
    pub fn write_file(&self, path: &Path) -> Result<(), I18nError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content + "\n")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

static BUNDLE: LazyLock<RwLock<MessageBundle>> =
    LazyLock::new(|| RwLock::new(MessageBundle::new()));

/// Define a message in the process-wide bundle.
pub fn define(id: &str, source: &str, package: &str) {
    BUNDLE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .define(id, source, package);
}

/// Translate a message from the process-wide bundle.
pub fn translate(id: &str, language: &str) -> Option<String> {
    BUNDLE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .translate(id, language)
        .map(ToString::to_string)
}

/// Merge a translations file into the process-wide bundle.
pub fn merge_file(path: &Path) -> Result<usize, I18nError> {
    let incoming = MessageBundle::read_file(path)?;
    let count = incoming.len();
    BUNDLE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .merge(incoming);
    tracing::debug!(path = %path.display(), count, "Merged message translations");
    Ok(count)
}

/// Snapshot of the process-wide bundle.
pub fn snapshot() -> MessageBundle {
    BUNDLE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Render the message of `err` in `language`.
pub fn localized_message(err: &Error, language: &str) -> String {
    let format = translate(&err.message_id(), language)
        .unwrap_or_else(|| err.message_format().to_string());
    format_message(&format, err.attributes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn translate_falls_back_to_source() {
        let mut bundle = MessageBundle::new();
        bundle.define("error:pkg/x:y", "not found", "pkg/x");
        assert!(bundle.set_translation("error:pkg/x:y", "nl", "niet gevonden"));
        assert_eq!(bundle.translate("error:pkg/x:y", "nl"), Some("niet gevonden"));
        assert_eq!(bundle.translate("error:pkg/x:y", "ja"), Some("not found"));
        assert_eq!(bundle.translate("error:pkg/x:z", "en"), None);
    }

    #[test]
    fn changed_source_drops_stale_translations() {
        let mut bundle = MessageBundle::new();
        bundle.define("m", "old", "pkg");
        bundle.set_translation("m", "nl", "oud");
        assert!(bundle.define("m", "new", "pkg"));
        assert_eq!(bundle.translate("m", "nl"), Some("new"));
        assert!(!bundle.define("m", "new", "pkg"));
    }

    #[test]
    fn merge_keeps_matching_translations_only() {
        let mut bundle = MessageBundle::new();
        bundle.define("a", "alpha", "pkg");
        bundle.define("b", "beta", "pkg");

        let mut file = MessageBundle::new();
        file.define("a", "alpha", "pkg");
        file.set_translation("a", "nl", "alfa");
        file.define("b", "outdated beta", "pkg");
        file.set_translation("b", "nl", "oude beta");

        bundle.merge(file);
        assert_eq!(bundle.translate("a", "nl"), Some("alfa"));
        assert_eq!(bundle.translate("b", "nl"), Some("beta"));
    }

    #[test]
    fn cleanup_removes_untouched_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");

        let mut written = MessageBundle::new();
        written.define("stale", "gone", "pkg");
        written.write_file(&path).unwrap();

        let mut bundle = MessageBundle::new();
        bundle.define("live", "here", "pkg");
        bundle.merge(MessageBundle::read_file(&path).unwrap());
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.cleanup(), 1);
        assert!(bundle.get("live").is_some());
        assert!(bundle.get("stale").is_none());
    }
}
