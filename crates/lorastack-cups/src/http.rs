//! HTTP routes of the configuration server.

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing::{debug, warn};

use lorastack_core::errors::canonical;
use lorastack_core::{Error, Result};

use crate::errors::ERR_INVALID_REQUEST;
use crate::server::CupsServer;
use crate::wire::UpdateInfoRequest;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<CupsServer>,
}

/// An error rendered as its JSON body with the matching HTTP status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, "Request rejected");
        }
        (status, Json(self.0.body())).into_response()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/update-info", post(update_info))
        .route("/api/v2/gateways/{gateway_id}", get(the_things_gateway))
        .route("/healthz", get(healthz))
        .with_state(state)
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Run a handler under the request timeout.
async fn with_deadline<T>(state: &AppState, handler: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(state.server.config().timeouts.request(), handler)
        .await
        .map_err(|_| canonical::deadline_exceeded())?
}

/// `POST /update-info`
async fn update_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let req: UpdateInfoRequest =
        serde_json::from_slice(&body).map_err(|e| ERR_INVALID_REQUEST.with_cause(e))?;
    let frame = with_deadline(&state, async {
        state
            .server
            .update_info(authorization(&headers), &req)
            .await?
            .marshal()
    })
    .await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        frame,
    )
        .into_response())
}

/// `GET /api/v2/gateways/{gateway_id}`
async fn the_things_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let info = with_deadline(
        &state,
        state
            .server
            .the_things_gateway_info(authorization(&headers), &gateway_id),
    )
    .await?;
    Ok(Json(info).into_response())
}

/// `GET /healthz`
async fn healthz() -> &'static str {
    "ok"
}
