//! Domain error model.
//!
//! Errors are values built from statically declared [`Definition`]s. A
//! definition carries a namespace, a name unique within that namespace, an
//! ICU-style message format and a canonical gRPC code. An [`Error`] adds
//! attributes, an optional cause and opaque details.
//!
//! Definitions are declared with [`define_errors!`] and registered at
//! process start; registering two different definitions under the same
//! namespace and name panics.

pub mod canonical;
mod definition;
mod error;
mod format;
mod registry;
mod status;

#[cfg(test)]
mod tests;

pub use definition::Definition;
pub use error::{DetailBody, Error, ErrorBody};
pub use format::format_message;
pub use registry::{lookup, register, registered};
pub use status::{ErrorDetails, http_status};
pub use tonic::Code;

/// Result type alias using the domain [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Declare a set of error definitions sharing a namespace.
///
/// Generates one `static` [`Definition`] per entry and a
/// `register_errors()` function that registers all of them.
///
/// ```ignore
/// lorastack_core::define_errors! {
///     namespace = "pkg/cups";
///     /// The gateway has not enabled CUPS.
///     pub ERR_CUPS_NOT_ENABLED = PermissionDenied("cups_not_enabled", "CUPS is not enabled for gateway `{gateway_uid}`");
/// }
/// ```
#[macro_export]
macro_rules! define_errors {
    (
        namespace = $ns:literal;
        $(
            $(#[$meta:meta])*
            $vis:vis $ident:ident = $code:ident($name:literal, $format:literal);
        )*
    ) => {
        $(
            $(#[$meta])*
            $vis static $ident: $crate::errors::Definition =
                $crate::errors::Definition::new($ns, $name, $format, $crate::errors::Code::$code);
        )*

        /// Register every error definition declared in this module.
        pub fn register_errors() {
            $( $crate::errors::register(&$ident); )*
        }
    };
}

/// Check whether `err` or any error in its cause chain has the given code.
fn chain_has_code(err: &Error, code: Code) -> bool {
    err.chain().any(|e| e.code() == code)
}

macro_rules! code_predicates {
    ($( $(#[$meta:meta])* $fn_name:ident => $code:ident; )*) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(err: &Error) -> bool {
                chain_has_code(err, Code::$code)
            }
        )*
    };
}

code_predicates! {
    /// The operation was canceled.
    is_canceled => Cancelled;
    /// An unknown error.
    is_unknown => Unknown;
    /// The request was malformed.
    is_invalid_argument => InvalidArgument;
    /// The deadline expired before the operation completed.
    is_deadline_exceeded => DeadlineExceeded;
    /// The requested entity was not found.
    is_not_found => NotFound;
    /// The entity already exists.
    is_already_exists => AlreadyExists;
    /// The caller lacks a right.
    is_permission_denied => PermissionDenied;
    /// A quota or resource was exhausted.
    is_resource_exhausted => ResourceExhausted;
    /// The system is not in the state required by the operation.
    is_failed_precondition => FailedPrecondition;
    /// The operation was aborted, typically by a concurrency conflict.
    is_aborted => Aborted;
    /// The operation is not implemented.
    is_unimplemented => Unimplemented;
    /// An internal invariant was broken.
    is_internal => Internal;
    /// A peer is unreachable.
    is_unavailable => Unavailable;
    /// Data was lost or corrupted.
    is_data_loss => DataLoss;
    /// The caller did not present usable credentials.
    is_unauthenticated => Unauthenticated;
}
