//! Canonical error definitions, one per gRPC code.
//!
//! Used when an error has no more specific definition, e.g. when wrapping
//! I/O errors or reconstructing a status received from a peer.

crate::define_errors! {
    namespace = "pkg/errors";
    pub ERR_CANCELED = Cancelled("canceled", "canceled");
    pub ERR_UNKNOWN = Unknown("unknown", "unknown error");
    pub ERR_INVALID_ARGUMENT = InvalidArgument("invalid_argument", "invalid argument");
    pub ERR_DEADLINE_EXCEEDED = DeadlineExceeded("deadline_exceeded", "deadline exceeded");
    pub ERR_NOT_FOUND = NotFound("not_found", "not found");
    pub ERR_ALREADY_EXISTS = AlreadyExists("already_exists", "already exists");
    pub ERR_PERMISSION_DENIED = PermissionDenied("permission_denied", "permission denied");
    pub ERR_RESOURCE_EXHAUSTED = ResourceExhausted("resource_exhausted", "resource exhausted");
    pub ERR_FAILED_PRECONDITION = FailedPrecondition("failed_precondition", "failed precondition");
    pub ERR_ABORTED = Aborted("aborted", "aborted");
    pub ERR_OUT_OF_RANGE = OutOfRange("out_of_range", "out of range");
    pub ERR_UNIMPLEMENTED = Unimplemented("unimplemented", "unimplemented");
    pub ERR_INTERNAL = Internal("internal", "internal error");
    pub ERR_UNAVAILABLE = Unavailable("unavailable", "unavailable");
    pub ERR_DATA_LOSS = DataLoss("data_loss", "data loss");
    pub ERR_UNAUTHENTICATED = Unauthenticated("unauthenticated", "unauthenticated");
}

use super::{Code, Definition};

/// The canonical definition for a gRPC code.
pub fn for_code(code: Code) -> &'static Definition {
    match code {
        Code::Ok | Code::Unknown => &ERR_UNKNOWN,
        Code::Cancelled => &ERR_CANCELED,
        Code::InvalidArgument => &ERR_INVALID_ARGUMENT,
        Code::DeadlineExceeded => &ERR_DEADLINE_EXCEEDED,
        Code::NotFound => &ERR_NOT_FOUND,
        Code::AlreadyExists => &ERR_ALREADY_EXISTS,
        Code::PermissionDenied => &ERR_PERMISSION_DENIED,
        Code::ResourceExhausted => &ERR_RESOURCE_EXHAUSTED,
        Code::FailedPrecondition => &ERR_FAILED_PRECONDITION,
        Code::Aborted => &ERR_ABORTED,
        Code::OutOfRange => &ERR_OUT_OF_RANGE,
        Code::Unimplemented => &ERR_UNIMPLEMENTED,
        Code::Internal => &ERR_INTERNAL,
        Code::Unavailable => &ERR_UNAVAILABLE,
        Code::DataLoss => &ERR_DATA_LOSS,
        Code::Unauthenticated => &ERR_UNAUTHENTICATED,
    }
}

/// Error for a canceled request context.
pub fn canceled() -> super::Error {
    ERR_CANCELED.new_error()
}

/// Error for an expired request deadline.
pub fn deadline_exceeded() -> super::Error {
    ERR_DEADLINE_EXCEEDED.new_error()
}
