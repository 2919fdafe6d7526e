//! Registry error definitions.

lorastack_core::define_errors! {
    namespace = "pkg/registry";
    pub ERR_ALREADY_EXISTS = AlreadyExists("already_exists", "{entity} `{id}` already exists");
    pub ERR_NOT_FOUND = NotFound("not_found", "{entity} `{id}` not found");
    pub ERR_TOO_MANY = FailedPrecondition("too_many", "{count} records of {entity} match `{id}`");
    pub ERR_INVALID_FIELD_PATH = InvalidArgument("invalid_field_path", "invalid field path `{path}` for {entity}");
    pub ERR_CORRUPT_RECORD = DataLoss("corrupt_record", "stored {entity} `{key}` cannot be decoded");
}
