#![allow(clippy::unwrap_used, clippy::panic)]

use serde_json::json;

use super::*;

crate::define_errors! {
    namespace = "pkg/errors/test";
    ERR_GATEWAY_NOT_FOUND = NotFound("gateway_not_found", "gateway `{gateway_uid}` not found");
    ERR_LOOKUP_FAILED = Unavailable("lookup_failed", "lookup failed");
}

static ERR_DUPLICATE_A: Definition =
    Definition::new("pkg/errors/test", "duplicate", "first", Code::Internal);
static ERR_DUPLICATE_B: Definition =
    Definition::new("pkg/errors/test", "duplicate", "second", Code::Internal);

#[test]
fn error_carries_definition_fields() {
    let err = ERR_GATEWAY_NOT_FOUND.with_attribute("gateway_uid", "eui-58a0cbfffe800019");
    assert_eq!(err.namespace(), "pkg/errors/test");
    assert_eq!(err.name(), "gateway_not_found");
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), "gateway `eui-58a0cbfffe800019` not found");
    assert!(err.backtrace().is_some());
    assert_eq!(
        err.to_string(),
        "error:pkg/errors/test:gateway_not_found (gateway `eui-58a0cbfffe800019` not found)"
    );
}

#[test]
fn predicates_walk_the_cause_chain() {
    let inner = ERR_GATEWAY_NOT_FOUND.new_error();
    let outer = ERR_LOOKUP_FAILED.with_cause(inner);
    assert!(is_unavailable(&outer));
    assert!(is_not_found(&outer));
    assert!(!is_permission_denied(&outer));
    assert!(outer.is(&ERR_GATEWAY_NOT_FOUND));
    assert!(ERR_LOOKUP_FAILED.matches(&outer));
    assert_eq!(outer.chain().count(), 2);
}

#[test]
#[should_panic(expected = "already set")]
fn replacing_a_cause_panics() {
    let _ = ERR_LOOKUP_FAILED
        .with_cause(ERR_GATEWAY_NOT_FOUND.new_error())
        .with_cause(ERR_GATEWAY_NOT_FOUND.new_error());
}

#[test]
fn status_round_trip_preserves_error() {
    register_errors();
    let err = ERR_LOOKUP_FAILED
        .with_attribute("attempt", 3)
        .with_details(prost_types::Any {
            type_url: "type.example/detail".to_string(),
            value: vec![1, 2, 3],
        })
        .with_cause(ERR_GATEWAY_NOT_FOUND.with_attribute("gateway_uid", "gw-1"));

    let status = err.to_status();
    assert_eq!(status.code(), Code::Unavailable);

    let back = Error::from_status(&status);
    assert_eq!(back.namespace(), "pkg/errors/test");
    assert_eq!(back.name(), "lookup_failed");
    assert_eq!(back.attribute("attempt"), Some(&json!(3)));
    assert_eq!(back.details().len(), 1);
    let cause = back.cause().unwrap();
    assert_eq!(cause.message(), "gateway `gw-1` not found");
    assert!(back.is(&ERR_GATEWAY_NOT_FOUND));
    assert!(back.backtrace().is_none());
}

#[test]
fn plain_status_maps_to_canonical_definition() {
    let status = tonic::Status::permission_denied("no rights");
    let err = Error::from_status(&status);
    assert!(err.is(&canonical::ERR_PERMISSION_DENIED));
    assert_eq!(err.attribute("message"), Some(&json!("no rights")));
}

#[test]
fn http_mapping_follows_canonical_table() {
    let cases = [
        (Code::InvalidArgument, 400),
        (Code::Unauthenticated, 401),
        (Code::PermissionDenied, 403),
        (Code::NotFound, 404),
        (Code::AlreadyExists, 409),
        (Code::Cancelled, 499),
        (Code::Internal, 500),
        (Code::Unavailable, 503),
        (Code::DeadlineExceeded, 504),
    ];
    for (code, status) in cases {
        assert_eq!(http_status(code), status, "{code:?}");
    }
}

#[test]
fn body_contains_wire_fields() {
    let err = ERR_GATEWAY_NOT_FOUND.with_attribute("gateway_uid", "gw-1");
    let body = serde_json::to_value(err.body()).unwrap();
    assert_eq!(body["namespace"], "pkg/errors/test");
    assert_eq!(body["name"], "gateway_not_found");
    assert_eq!(body["message_format"], "gateway `{gateway_uid}` not found");
    assert_eq!(body["attributes"]["gateway_uid"], "gw-1");
    assert_eq!(body["code"], 5);
}

#[test]
fn registering_twice_is_idempotent() {
    register(&ERR_GATEWAY_NOT_FOUND);
    register(&ERR_GATEWAY_NOT_FOUND);
    assert!(lookup("pkg/errors/test", "gateway_not_found").is_some());
    assert!(crate::i18n::translate("error:pkg/errors/test:gateway_not_found", "en").is_some());
}

#[test]
#[should_panic(expected = "registered twice")]
fn duplicate_names_panic() {
    register(&ERR_DUPLICATE_A);
    register(&ERR_DUPLICATE_B);
}

#[test]
fn io_errors_map_to_canonical_codes() {
    let err = Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
    assert!(is_unavailable(&err));
}
