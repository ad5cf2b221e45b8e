//! HTTP status surface for connection codes and relay state.
//!
//! # Routes
//!
//! - `GET /codes` - active connection codes as JSON (`?hours=N` narrows the window)
//! - `GET /codes-page` - the same listing as an HTML page
//! - `GET /status` - attached clients and pending-request counters
//! - `POST /codes/:code/resolve` - resolve a code to its endpoint, recording the access
//!
//! `GET` routes are side-effect free.

mod page;

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::codes::{CodeListing, ConnectionCodeDirectory, StoreError};
use crate::relay::{ClientId, CommandRelay, PendingStatsSnapshot};

pub use page::render_codes_page;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Source of the connection code listing.
    pub directory: Arc<ConnectionCodeDirectory>,
    /// The relay whose status is reported.
    pub relay: Arc<CommandRelay>,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    hours: Option<u32>,
}

impl WindowQuery {
    /// `Ok(None)` selects the directory's default window.
    fn window(&self) -> Result<Option<chrono::Duration>, Response> {
        self.hours
            .map(|h| {
                chrono::Duration::try_hours(i64::from(h)).ok_or_else(|| {
                    error_response(StatusCode::BAD_REQUEST, format!("hours out of range: {h}"))
                })
            })
            .transpose()
    }
}

/// Body of a successful `POST /codes/:code/resolve`.
#[derive(Debug, Serialize)]
pub struct ResolvedCode {
    /// The resolved code.
    pub code: String,
    /// Endpoint the code is bound to.
    pub endpoint: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct RelayStatus {
    /// Attached clients in attach order.
    pub clients: Vec<ClientId>,
    /// Commands currently awaiting a response.
    pub pending: usize,
    /// Lifetime counters of the pending table.
    pub stats: PendingStatsSnapshot,
}

/// Builds the router over `state`.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/codes", get(list_codes))
        .route("/codes-page", get(codes_page))
        .route("/status", get(relay_status))
        .route("/codes/:code/resolve", post(resolve_code))
        .with_state(state)
}

/// Serves the router until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: HttpState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "HTTP status surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn list_codes(
    State(state): State<HttpState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<CodeListing>, Response> {
    let window = query.window()?;
    Ok(Json(state.directory.list_active(window).await))
}

async fn codes_page(
    State(state): State<HttpState>,
    Query(query): Query<WindowQuery>,
) -> Result<Html<String>, Response> {
    let listing = state.directory.list_active(query.window()?).await;
    Ok(Html(render_codes_page(&listing)))
}

async fn resolve_code(
    State(state): State<HttpState>,
    Path(code): Path<String>,
) -> Result<Json<ResolvedCode>, Response> {
    match state.directory.resolve(&code).await {
        Ok(Some(endpoint)) => {
            info!(code = %code, "Resolved connection code");
            Ok(Json(ResolvedCode { code, endpoint }))
        }
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Connection code not found",
        )),
        Err(StoreError::ReadOnly) => Err(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            StoreError::ReadOnly.to_string(),
        )),
        Err(e) => {
            warn!(code = %code, error = %e, "Error resolving connection code");
            Err(error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

async fn relay_status(State(state): State<HttpState>) -> Json<RelayStatus> {
    let relay = &state.relay;
    Json(RelayStatus {
        clients: relay.attached_clients(),
        pending: relay.pending().len(),
        stats: relay.pending().stats().snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::codes::{ConnectionCodeRecord, FileCodeStore, MemoryCodeStore};
    use crate::transport::ChannelTransport;

    fn state_with(store: MemoryCodeStore) -> HttpState {
        let (transport, _rx) = ChannelTransport::new();
        HttpState {
            directory: Arc::new(ConnectionCodeDirectory::new(
                Arc::new(store),
                chrono::Duration::hours(24),
            )),
            relay: Arc::new(CommandRelay::new(
                Arc::new(transport),
                Duration::from_secs(30),
            )),
        }
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        send(app, Method::GET, uri).await
    }

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn seeded_store() -> MemoryCodeStore {
        let now = Utc::now();
        let store = MemoryCodeStore::new();
        store.insert(
            ConnectionCodeRecord {
                code: "RedRhino123".to_string(),
                created_time: now,
                last_access_time: now,
                connection_count: 2,
            },
            "tcp://127.0.0.1:1999",
        );
        store
    }

    #[tokio::test]
    async fn codes_route_returns_json_listing() {
        let (status, body) = get_body(router(state_with(seeded_store())), "/codes").await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["codes"][0]["code"], "RedRhino123");
        assert_eq!(value["codes"][0]["connectionCount"], 2);
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn codes_page_renders_html() {
        let (status, body) = get_body(router(state_with(seeded_store())), "/codes-page").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<table"));
        assert!(body.contains("RedRhino123"));
    }

    #[tokio::test]
    async fn status_route_reports_clients() {
        let state = state_with(MemoryCodeStore::new());
        state.relay.attach_client(ClientId::from("clientA"));

        let (status, body) = get_body(router(state), "/status").await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["clients"], serde_json::json!(["clientA"]));
        assert_eq!(value["pending"], 0);
        assert_eq!(value["stats"]["registered"], 0);
    }

    #[tokio::test]
    async fn huge_window_is_served_without_panicking() {
        let app = router(state_with(seeded_store()));
        let (status, body) = get_body(app.clone(), "/codes?hours=4000000000").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["codes"][0]["code"], "RedRhino123");

        let (status, _) = get_body(app, "/codes-page?hours=4294967295").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn negative_window_is_rejected() {
        let (status, _) = get_body(router(state_with(seeded_store())), "/codes?hours=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resolve_route_records_access() {
        let app = router(state_with(seeded_store()));

        let (status, body) = send(app.clone(), Method::POST, "/codes/RedRhino123/resolve").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["endpoint"], "tcp://127.0.0.1:1999");

        let (_, body) = get_body(app.clone(), "/codes").await;
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["codes"][0]["connectionCount"], 3);

        let (status, body) = send(app.clone(), Method::POST, "/codes/NoSuchCode100/resolve").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("not found"));

        let (status, _) = get_body(app, "/codes/RedRhino123/resolve").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn resolve_against_file_store_is_refused() {
        let mut state = state_with(MemoryCodeStore::new());
        state.directory = Arc::new(ConnectionCodeDirectory::new(
            Arc::new(FileCodeStore::new("/nonexistent/codes.json")),
            chrono::Duration::hours(24),
        ));

        let (status, body) = send(router(state), Method::POST, "/codes/RedRhino123/resolve").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(body.contains("read-only"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _) = get_body(router(state_with(MemoryCodeStore::new())), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
