//! Request handler for `/proxy-download`.

use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Body of a proxy request.
#[derive(Debug, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
    /// Label used only for logging.
    #[serde(default = "default_key")]
    pub key: String,
}

fn default_key() -> String {
    "unknown".to_string()
}

/// Fetch `url` and hand the bytes back with permissive CORS.
pub async fn handle_proxy_download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProxyRequest>,
) -> Response {
    info!("Proxying download: {}", request.key);
    debug!("  URL: {}", request.url.chars().take(100).collect::<String>());

    match fetch(&state.http, &request.url).await {
        Ok(Upstream::Body { content_type, body }) => {
            info!("  Success: {} bytes", body.len());
            (
                StatusCode::OK,
                [
                    (CONTENT_TYPE, content_type),
                    (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                ],
                body,
            )
                .into_response()
        }
        Ok(Upstream::Status(status)) => {
            error!("  Error: HTTP {}", status.as_u16());
            json_error(status, json!({ "error": format!("HTTP {}", status.as_u16()) }))
        }
        Err(e) if e.is_timeout() => {
            error!("  Request timeout");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Request timeout" }),
            )
        }
        Err(e) => {
            error!("  Error: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Proxy error", "message": e.to_string() }),
            )
        }
    }
}

enum Upstream {
    Body { content_type: HeaderValue, body: Bytes },
    Status(StatusCode),
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<Upstream, reqwest::Error> {
    let response = http.get(url).send().await?;

    let status = response.status().as_u16();
    if status != 200 {
        return Ok(Upstream::Status(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        ));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let body = response.bytes().await?;

    Ok(Upstream::Body { content_type, body })
}

fn json_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}
