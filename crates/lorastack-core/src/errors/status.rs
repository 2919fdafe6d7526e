//! Conversion between domain errors, gRPC statuses and HTTP status codes.

use std::collections::BTreeMap;

use prost::Message;
use tonic::Status;

use super::Code;
use super::canonical;
use super::error::Error;

/// Wire form of an error carried in the gRPC status details.
///
/// Peers decode this to rebuild the original error, including its cause
/// chain.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorDetails {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub message_format: String,
    /// Attributes as a JSON object.
    #[prost(string, tag = "4")]
    pub attributes: String,
    #[prost(uint32, tag = "5")]
    pub code: u32,
    #[prost(message, optional, boxed, tag = "6")]
    pub cause: Option<Box<ErrorDetails>>,
    #[prost(message, repeated, tag = "7")]
    pub details: Vec<prost_types::Any>,
}

impl From<&Error> for ErrorDetails {
    fn from(err: &Error) -> Self {
        Self {
            namespace: err.namespace().to_string(),
            name: err.name().to_string(),
            message_format: err.message_format().to_string(),
            attributes: serde_json::to_string(err.attributes()).unwrap_or_default(),
            code: err.code() as u32,
            cause: err.cause().map(|c| Box::new(Self::from(c))),
            details: err.details().to_vec(),
        }
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        let code = Code::from(i32::try_from(details.code).unwrap_or_default());
        let attributes: BTreeMap<String, serde_json::Value> = if details.attributes.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&details.attributes).unwrap_or_default()
        };
        let mut err = Self::from_parts(
            details.namespace,
            details.name,
            details.message_format,
            code,
        )
        .with_attributes(attributes.iter().map(|(k, v)| (k.as_str(), v.clone())));
        for d in details.details {
            err = err.with_details(d);
        }
        if let Some(cause) = details.cause {
            err = err.with_cause(Self::from(*cause));
        }
        err
    }
}

impl Error {
    /// Convert to a gRPC status, carrying the full error in the details.
    pub fn to_status(&self) -> Status {
        let details = ErrorDetails::from(self).encode_to_vec();
        Status::with_details(self.code(), self.message(), bytes::Bytes::from(details))
    }

    /// Rebuild an error from a gRPC status.
    ///
    /// Statuses without decodable details map to the canonical definition
    /// for their code, with the status message as attribute.
    pub fn from_status(status: &Status) -> Self {
        if !status.details().is_empty() {
            if let Ok(details) = ErrorDetails::decode(status.details()) {
                return Self::from(details);
            }
        }
        canonical::for_code(status.code()).with_attribute("message", status.message())
    }

    /// HTTP status code for this error.
    pub const fn http_status(&self) -> u16 {
        http_status(self.code())
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::from_status(&status)
    }
}

/// Canonical gRPC code to HTTP status mapping.
pub const fn http_status(code: Code) -> u16 {
    match code {
        Code::Ok => 200,
        Code::Cancelled => 499,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => 400,
        Code::DeadlineExceeded => 504,
        Code::NotFound => 404,
        Code::AlreadyExists | Code::Aborted => 409,
        Code::PermissionDenied => 403,
        Code::ResourceExhausted => 429,
        Code::Unimplemented => 501,
        Code::Unavailable => 503,
        Code::Unauthenticated => 401,
        Code::Unknown | Code::Internal | Code::DataLoss => 500,
    }
}
