//! Store error definitions.

lorastack_core::define_errors! {
    namespace = "pkg/store";
    pub ERR_INVALID_DATA = InvalidArgument("invalid_data", "invalid data: {reason}");
    pub ERR_NIL_KEY = InvalidArgument("nil_key", "nil primary key");
    pub ERR_INVALID_KEY = InvalidArgument("invalid_key", "invalid primary key `{key}`");
    pub ERR_NOT_FOUND = NotFound("not_found", "record `{key}` not found");
    pub ERR_TX_FAILED = Aborted("tx_failed", "transaction failed after {attempts} attempts");
    pub ERR_DATABASE = Unavailable("database", "database error: {message}");
    pub ERR_UNKNOWN_ENCODING = DataLoss("unknown_encoding", "unknown value encoding `{tag}` at `{path}`");
}
