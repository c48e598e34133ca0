//! HTTP server implementation using Axum.

use crate::handler::handle_proxy_download;
use axum::{routing::post, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

const USER_AGENT: &str = "SyftBox-Proxy/1.0";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Deadline for the whole upstream fetch.
    pub upstream_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(60),
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

/// Build the proxy router.
pub fn router(state: Arc<AppState>) -> Router {
    // Browsers call us from arbitrary origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/proxy-download", post(handle_proxy_download))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the proxy server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(config: ProxyConfig, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState::new(&config)?);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Proxy listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, HeaderMap, Request, StatusCode};
    use axum::response::Response;
    use axum::routing::get;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route(
                "/blob.txt",
                get(|headers: HeaderMap| async move {
                    let agent = headers
                        .get(header::USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    ([(header::CONTENT_TYPE, "text/plain")], format!("hello from {}", agent))
                }),
            )
            .route(
                "/untyped",
                get(|| async { Response::new(Body::from(vec![1u8, 2, 3])) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .fallback(|| async { StatusCode::NOT_FOUND });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn proxy(timeout: Duration) -> Router {
        let config = ProxyConfig {
            upstream_timeout: timeout,
        };
        router(Arc::new(AppState::new(&config).unwrap()))
    }

    async fn call(app: Router, body: Value) -> (StatusCode, HeaderMap, Vec<u8>) {
        let request = Request::post("/proxy-download")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ORIGIN, "https://app.example")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_forwards_body_and_content_type() {
        let upstream = spawn_upstream().await;
        let (status, headers, body) = call(
            proxy(Duration::from_secs(5)),
            json!({"url": format!("{}/blob.txt", upstream), "key": "blob"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body, b"hello from SyftBox-Proxy/1.0");
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_octet_stream() {
        let upstream = spawn_upstream().await;
        let (status, headers, body) = call(
            proxy(Duration::from_secs(5)),
            json!({"url": format!("{}/untyped", upstream)}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(body, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upstream_status_is_passed_through() {
        let upstream = spawn_upstream().await;
        let (status, _, body) = call(
            proxy(Duration::from_secs(5)),
            json!({"url": format!("{}/gone", upstream)}),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"error": "HTTP 404"}));
    }

    #[tokio::test]
    async fn test_upstream_timeout() {
        let upstream = spawn_upstream().await;
        let (status, _, body) = call(
            proxy(Duration::from_millis(200)),
            json!({"url": format!("{}/slow", upstream)}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"error": "Request timeout"}));
    }

    #[tokio::test]
    async fn test_invalid_url_is_proxy_error() {
        let (status, _, body) = call(
            proxy(Duration::from_secs(5)),
            json!({"url": "not a url"}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Proxy error");
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn test_server_starts() {
        let addr = start_server(ProxyConfig::default(), "127.0.0.1", 0)
            .await
            .unwrap();
        assert!(addr.port() > 0);
    }
}
