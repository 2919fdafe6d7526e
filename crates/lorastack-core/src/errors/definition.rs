//! Static error definitions.

use serde_json::Value;

use super::Code;
use super::error::Error;

/// A statically declared error kind.
///
/// Definitions are `static` items; errors keep a reference to the
/// definition they were built from so that [`Error::is`] can compare by
/// identity across the cause chain.
#[derive(Debug)]
pub struct Definition {
    namespace: &'static str,
    name: &'static str,
    message_format: &'static str,
    code: Code,
}

impl Definition {
    pub const fn new(
        namespace: &'static str,
        name: &'static str,
        message_format: &'static str,
        code: Code,
    ) -> Self {
        Self {
            namespace,
            name,
            message_format,
            code,
        }
    }

    pub const fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn message_format(&self) -> &'static str {
        self.message_format
    }

    pub const fn code(&self) -> Code {
        self.code
    }

    /// Message id used by the i18n bundle: `error:<namespace>:<name>`.
    pub fn message_id(&self) -> String {
        format!("error:{}:{}", self.namespace, self.name)
    }

    /// Build an error without attributes.
    pub fn new_error(&'static self) -> Error {
        Error::from_definition(self)
    }

    /// Build an error with a single attribute.
    pub fn with_attribute(&'static self, key: &str, value: impl Into<Value>) -> Error {
        Error::from_definition(self).with_attribute(key, value)
    }

    /// Build an error with attributes.
    pub fn with_attributes<'a, I, V>(&'static self, attributes: I) -> Error
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<Value>,
    {
        Error::from_definition(self).with_attributes(attributes)
    }

    /// Build an error wrapping `cause`.
    pub fn with_cause(&'static self, cause: impl Into<Error>) -> Error {
        Error::from_definition(self).with_cause(cause)
    }

    /// Check whether `err` (or anything in its cause chain) was built from
    /// this definition.
    pub fn matches(&self, err: &Error) -> bool {
        err.is(self)
    }
}

impl PartialEq for Definition {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl Eq for Definition {}
