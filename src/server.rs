//! Dashboard HTTP server.
//!
//! Routes:
//! - `GET /` serves the embedded dashboard page
//! - `GET /api/stats` returns [`DashboardStats`] as JSON, or 500 `{"error": ..}`
//! - `GET /test` reports liveness and whether a store handle is held

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::queries::basic_stats;
use crate::report::DashboardStats;
use crate::store::RecordStore;

const DASHBOARD_HTML: &str = include_str!("../static/dashboard.html");

pub const RUNNING_STATUS: &str = "Dashboard is running";

/// Shared server state. `store` is `None` when the record store could not be
/// reached at startup; the server then runs degraded.
#[derive(Clone, Default)]
pub struct AppState {
    store: Option<Arc<dyn RecordStore>>,
}

impl AppState {
    pub fn new(store: Option<Arc<dyn RecordStore>>) -> Self {
        Self { store }
    }

    pub fn connected(&self) -> bool {
        self.store.is_some()
    }
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    mongodb_connected: bool,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(dashboard))
        .route("/api/stats", get(api_stats))
        .route("/test", get(health))
        .layer(cors)
        .with_state(state)
}

pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!(%addr, connected = state.connected(), "Dashboard listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

#[tracing::instrument(skip_all)]
async fn api_stats(State(st): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let Some(store) = st.store.as_deref() else {
        return Err(ApiError::internal("Database connection not available"));
    };

    match basic_stats(store).await {
        Ok(stats) => Ok(Json(stats.into())),
        Err(e) => {
            error!(error = %e, "Failed to build dashboard stats");
            Err(ApiError::internal(e.to_string()))
        }
    }
}

async fn health(State(st): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: RUNNING_STATUS,
        mongodb_connected: st.connected(),
    })
}
