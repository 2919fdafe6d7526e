#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use lorastack_cups::http::{AppState, router};
use lorastack_cups::server::attributes as attr;
use lorastack_cups::ttg::GatewayInfo;
use lorastack_cups::{CupsServer, UpdateInfoResponse};
use lorastack_registry::{EntityIdentifiers, GatewayIdentifiers, Right};

use common::{GATEWAY_ID, Harness};

fn app(server: CupsServer) -> axum::Router {
    router(AppState {
        server: Arc::new(server),
    })
}

/// Send a request and return (status, content type, body).
async fn send(
    app: axum::Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (StatusCode, String, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for &(name, value) in headers {
        builder = builder.header(name, value);
    }
    let resp = app
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, body.to_vec())
}

const UPDATE_INFO: &str = r#"{
    "router": "58a0:cbff:fe80:19",
    "cupsUri": "https://cups:443",
    "tcUri": "",
    "cupsCredCrc": 1398343300,
    "tcCredCrc": 0,
    "station": "2.0.6(rak/std)",
    "model": "rak7248",
    "package": "1.0.0",
    "keys": []
}"#;

#[tokio::test]
async fn update_info_returns_frame() {
    let h = Harness::new().await;
    let (status, content_type, body) = send(
        app(h.server(h.config())),
        Method::POST,
        "/update-info",
        &[("content-type", "application/json")],
        UPDATE_INFO,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/octet-stream");

    let res = UpdateInfoResponse::unmarshal(&body).unwrap();
    assert_eq!(res.lns_uri, "wss://lns:443");
    assert!(!res.cups_credentials.is_empty());
    assert!(!res.lns_credentials.is_empty());
    assert_eq!(h.stored().await.ids.gateway_id, GATEWAY_ID);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let h = Harness::new().await;
    let (status, content_type, body) = send(
        app(h.server(h.config())),
        Method::POST,
        "/update-info",
        &[],
        r#"{"router": "not an eui"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(content_type.starts_with("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["namespace"], "pkg/basicstation/cups");
    assert_eq!(body["name"], "invalid_request");
}

#[tokio::test]
async fn missing_credentials_are_unauthorized() {
    let h = Harness::new().await;
    let (status, _, body) = send(
        app(h.server(lorastack_cups::ServerConfig::default())),
        Method::POST,
        "/update-info",
        &[("authorization", "gateway-token")],
        UPDATE_INFO,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["name"], "unauthenticated");
    assert_eq!(body["attributes"]["gateway_eui"], "58A0CBFFFE800019");
}

#[tokio::test]
async fn request_deadline_is_gateway_timeout() {
    let h = Harness::new().await;
    h.register(&[], |_| {}).await;
    let mut config = h.config();
    config.timeouts.request_secs = 1;
    let server = h.server_with_registry(config, h.slow("get", Duration::from_secs(3)));

    let (status, _, body) = send(
        app(server),
        Method::POST,
        "/update-info",
        &[("content-type", "application/json")],
        UPDATE_INFO,
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["name"], "deadline_exceeded");
}

#[tokio::test]
async fn health_check() {
    let h = Harness::new().await;
    let (status, _, body) = send(app(h.server(h.config())), Method::GET, "/healthz", &[], "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn the_things_gateway_gets_its_configuration() {
    let h = Harness::new().await;
    h.register(&[], |gw| {
        gw.frequency_plan_id = "EU_863_870".to_string();
        gw.gateway_server_address = "router.example".to_string();
        gw.auto_update = true;
    })
    .await;
    let (_, key) = h
        .service
        .access()
        .create_api_key(
            &EntityIdentifiers::from(GatewayIdentifiers::new(GATEWAY_ID)),
            "ttg",
            &[Right::GatewayInfo, Right::GatewaySettingsBasic],
        )
        .await
        .unwrap();
    let server = h.server(h.config());
    let expected_plan_url = format!(
        "{}/EU_863_870",
        server.config().the_things_gateway.frequency_plan_url
    );

    let (status, _, body) = send(
        app(server),
        Method::GET,
        &format!("/api/v2/gateways/{GATEWAY_ID}"),
        &[("authorization", &format!("Key {key}"))],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let info: GatewayInfo = serde_json::from_slice(&body).unwrap();
    assert_eq!(info.frequency_plan, "EU_863_870");
    assert_eq!(info.frequency_plan_url, expected_plan_url);
    assert_eq!(info.router.id, GATEWAY_ID);
    assert_eq!(info.router.mqtt_address, "mqtts://router.example:8883");
    assert!(info.auto_update);
    assert!(!info.firmware_url.is_empty());

    assert!(!h.stored().await.attribute(attr::CUPS_LAST_SEEN).is_empty());
}

#[tokio::test]
async fn the_things_gateway_requires_a_key() {
    let h = Harness::new().await;
    h.register(&[], |_| {}).await;

    let (status, _, _) = send(
        app(h.server(h.config())),
        Method::GET,
        &format!("/api/v2/gateways/{GATEWAY_ID}"),
        &[],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        app(h.server(h.config())),
        Method::GET,
        &format!("/api/v2/gateways/{GATEWAY_ID}"),
        &[("authorization", "Key NNSXS.UNKNOWN.SECRET")],
        "",
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
