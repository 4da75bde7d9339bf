use crate::server::ServerState;
use crate::shutdown::RelayState;
use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use duo_common::types::COUNT_PATH;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    peers: usize,
}

/// Build the status router.
///
/// `/count` answers with the number of connected peers as a decimal string.
/// `/metrics` is only mounted when a Prometheus handle is supplied.
pub fn router(state: Arc<ServerState>, metrics: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        .route(COUNT_PATH, get(count_handler))
        .route("/health", get(health_handler));

    if let Some(handle) = metrics {
        app = app.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        );
    }

    app.with_state(state)
}

/// Serve the status router on `listener` until the relay shuts down.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn serve_status(
    listener: TcpListener,
    state: Arc<ServerState>,
    metrics: Option<PrometheusHandle>,
) -> std::io::Result<()> {
    tracing::info!("status server listening on {}", listener.local_addr()?);
    let token = state.shutdown.token();
    axum::serve(listener, router(state, metrics))
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    tracing::debug!("status server stopped");
    Ok(())
}

/// Peer count handler - returns the registry size, or 503 once shutting down.
async fn count_handler(State(state): State<Arc<ServerState>>) -> (StatusCode, String) {
    match state.shutdown.state() {
        RelayState::Running => (StatusCode::OK, state.registry.count().to_string()),
        RelayState::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting down".to_string(),
        ),
    }
}

/// Health check handler - returns 200 while running, 503 after shutdown began.
async fn health_handler(
    State(state): State<Arc<ServerState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let peers = state.registry.count();
    match state.shutdown.state() {
        RelayState::Running => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                peers,
            }),
        ),
        RelayState::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "shutting down",
                peers,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::Peer;
    use axum::body::Body;
    use axum::http::Request;
    use duo_common::SniffingClassifier;
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    fn test_state() -> Arc<ServerState> {
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            status_addr: "127.0.0.1:1".parse().unwrap(),
            max_conns: 16,
            read_buffer: 1024,
            control_phrase: "CATASTROPHE".to_string(),
            drain_timeout: 1,
        };
        Arc::new(ServerState::new(
            config,
            SniffingClassifier::with_default_phrase().unwrap(),
        ))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn count_is_zero_without_peers() {
        let (status, body) = get_body(router(test_state(), None), "/count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "0");
    }

    #[tokio::test]
    async fn count_tracks_registry() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(listener.local_addr().unwrap()).await.unwrap());
            let (server, addr) = listener.accept().await.unwrap();
            let (_read, write) = server.into_split();
            state
                .registry
                .add(Arc::new(Peer::new(state.next_peer_id(), addr, write)));
        }

        let (_, body) = get_body(router(state.clone(), None), "/count").await;
        assert_eq!(body, "3");

        state.registry.remove(1);
        let (_, body) = get_body(router(state, None), "/count").await;
        assert_eq!(body, "2");
    }

    #[tokio::test]
    async fn count_unavailable_after_shutdown() {
        let state = test_state();
        state.shutdown.request_stop();
        let (status, _) = get_body(router(state, None), "/count").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_state() {
        let state = test_state();
        let (status, body) = get_body(router(state.clone(), None), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["peers"], 0);

        state.shutdown.request_stop();
        let (status, _) = get_body(router(state, None), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_not_mounted_without_handle() {
        let (status, _) = get_body(router(test_state(), None), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_status_stops_on_shutdown() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(serve_status(listener, state.clone(), None));

        state.shutdown.request_stop();
        tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
