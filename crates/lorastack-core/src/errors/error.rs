//! Error values.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Code;
use super::definition::Definition;
use super::format::format_message;

/// A domain error value.
#[derive(Debug, Clone)]
pub struct Error {
    definition: Option<&'static Definition>,
    namespace: Cow<'static, str>,
    name: Cow<'static, str>,
    message_format: Cow<'static, str>,
    code: Code,
    attributes: BTreeMap<String, Value>,
    cause: Option<Box<Error>>,
    details: Vec<prost_types::Any>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Error {
    pub(crate) fn from_definition(definition: &'static Definition) -> Self {
        Self {
            definition: Some(definition),
            namespace: Cow::Borrowed(definition.namespace()),
            name: Cow::Borrowed(definition.name()),
            message_format: Cow::Borrowed(definition.message_format()),
            code: definition.code(),
            attributes: BTreeMap::new(),
            cause: None,
            details: Vec::new(),
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Rebuild an error from its parts, e.g. after receiving it from a peer.
    ///
    /// If a definition with the same namespace and name is registered in this
    /// process the error is linked to it, so [`Error::is`] keeps working.
    pub fn from_parts(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message_format: impl Into<String>,
        code: Code,
    ) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        Self {
            definition: super::registry::lookup(&namespace, &name),
            namespace: Cow::Owned(namespace),
            name: Cow::Owned(name),
            message_format: Cow::Owned(message_format.into()),
            code,
            attributes: BTreeMap::new(),
            cause: None,
            details: Vec::new(),
            backtrace: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_format(&self) -> &str {
        &self.message_format
    }

    pub const fn code(&self) -> Code {
        self.code
    }

    pub const fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    pub fn details(&self) -> &[prost_types::Any] {
        &self.details
    }

    /// Stack captured when the error was built from its definition.
    ///
    /// Errors reconstructed from the wire carry no backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// The message format rendered with the error attributes.
    pub fn message(&self) -> String {
        format_message(&self.message_format, &self.attributes)
    }

    /// Message id used by the i18n bundle.
    pub fn message_id(&self) -> String {
        format!("error:{}:{}", self.namespace, self.name)
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_attributes<'a, I, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<Value>,
    {
        for (k, v) in attributes {
            self.attributes.insert(k.to_string(), v.into());
        }
        self
    }

    /// Set the cause of this error.
    ///
    /// # Panics
    ///
    /// An error has at most one cause; replacing an existing cause panics.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn with_cause(mut self, cause: impl Into<Self>) -> Self {
        if self.cause.is_some() {
            panic!("cause of error:{}:{} is already set", self.namespace, self.name);
        }
        self.cause = Some(Box::new(cause.into()));
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: prost_types::Any) -> Self {
        self.details.push(details);
        self
    }

    /// Iterate over this error and its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// Check whether this error or anything in its cause chain was built
    /// from `definition`.
    pub fn is(&self, definition: &Definition) -> bool {
        self.chain().any(|e| match e.definition {
            Some(d) => std::ptr::eq(d, definition) || d == definition,
            None => e.namespace == definition.namespace() && e.name == definition.name(),
        })
    }

    /// The JSON body sent to HTTP clients.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            namespace: self.namespace.to_string(),
            name: self.name.to_string(),
            message_format: self.message_format.to_string(),
            attributes: self.attributes.clone(),
            code: self.code as u32,
            cause: self.cause.as_ref().map(|c| Box::new(c.body())),
            details: self
                .details
                .iter()
                .map(|d| DetailBody {
                    type_url: d.type_url.clone(),
                    value: hex::encode(&d.value),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error:{}:{} ({})", self.namespace, self.name, self.message())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let definition = match err.kind() {
            std::io::ErrorKind::NotFound => &super::canonical::ERR_NOT_FOUND,
            std::io::ErrorKind::PermissionDenied => &super::canonical::ERR_PERMISSION_DENIED,
            std::io::ErrorKind::TimedOut => &super::canonical::ERR_DEADLINE_EXCEEDED,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => &super::canonical::ERR_UNAVAILABLE,
            _ => &super::canonical::ERR_UNKNOWN,
        };
        definition.with_attribute("message", err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        super::canonical::ERR_INVALID_ARGUMENT.with_attribute("message", err.to_string())
    }
}

/// JSON representation of an error, as returned by HTTP endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub namespace: String,
    pub name: String,
    pub message_format: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    pub code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorBody>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<DetailBody>,
}

/// Hex-encoded opaque detail payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailBody {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub value: String,
}
