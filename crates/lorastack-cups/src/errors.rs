//! Error definitions of the configuration server.

lorastack_core::define_errors! {
    namespace = "pkg/basicstation/cups";
    pub ERR_UNAUTHENTICATED = Unauthenticated("unauthenticated", "no usable credentials for gateway `{gateway_eui}`");
    pub ERR_CUPS_NOT_ENABLED = PermissionDenied("cups_not_enabled", "CUPS is not enabled for gateway `{gateway_uid}`");
    pub ERR_INVALID_TOKEN = PermissionDenied("invalid_token", "invalid credentials for gateway `{gateway_uid}`");
    pub ERR_INVALID_REQUEST = InvalidArgument("invalid_request", "invalid update-info request");
    pub ERR_FIELD_TOO_LONG = InvalidArgument("field_too_long", "field `{field}` is {length} bytes, at most {max} allowed");
    pub ERR_TRUNCATED = InvalidArgument("truncated", "response frame truncated in field `{field}`");
    pub ERR_TRAILING_DATA = InvalidArgument("trailing_data", "{length} trailing bytes after response frame");
    pub ERR_INVALID_ADDRESS = InvalidArgument("invalid_address", "invalid server address `{address}`");
    pub ERR_GATEWAY_EUI_MISMATCH = FailedPrecondition("gateway_eui_mismatch", "gateway `{gateway_uid}` is not registered with EUI `{gateway_eui}`");
    pub ERR_CORRUPT_ATTRIBUTE = DataLoss("corrupt_attribute", "attribute `{attribute}` of gateway `{gateway_uid}` is corrupt");
    pub ERR_NO_TRUST = NotFound("no_trust", "no trusted certificate for `{address}`");
    pub ERR_DIAL = Unavailable("dial", "failed to dial `{address}`");
    pub ERR_SIGN = Internal("sign", "failed to sign update with key `{key_crc}`");
    pub ERR_INVALID_SIGNING_KEY = InvalidArgument("invalid_signing_key", "invalid signing key `{path}`");
}
