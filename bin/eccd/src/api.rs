//! ---
//! ecc_section: "06-daemon"
//! ecc_subsection: "binary"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "HTTP management surface of the control center daemon."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ecc_common::config::ConfigStoreConfig;
use ecc_config::{ConfigStore, ServiceConfigProvider, SettingsUpdate};
use ecc_metrics::{metrics_handler, SharedRegistry};
use ecc_msg::{ServiceIdentity, StateValue};
use ecc_registry::{CommandClient, CommandError, ServiceRegistry};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared state injected into the handlers.
pub struct ApiState {
    pub equipment: Vec<ServiceIdentity>,
    pub registry: Arc<ServiceRegistry>,
    pub client: Arc<CommandClient>,
    pub store: Arc<dyn ConfigStore>,
    pub config_store: ConfigStoreConfig,
    pub metrics: Option<SharedRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlRequest {
    value: StateValue,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/api/equipment", get(get_equipment))
        .route("/api/services", get(list_services))
        .route("/api/services/:id", get(get_service))
        .route("/api/services/:id/controls/:control_id", post(post_control))
        .route(
            "/api/services/:id/config",
            get(get_service_config).put(put_service_config),
        )
        .with_state(state)
}

/// Running API server.
pub struct ApiServer {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServer {
    pub async fn spawn(state: Arc<ApiState>, listen: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let address = listener.local_addr()?;
        info!(address = %address, "api server listening");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });
        Ok(Self {
            address,
            task,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.address
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|join| anyhow::anyhow!(join))
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn not_found(service_id: &str) -> Response {
    error(StatusCode::NOT_FOUND, format!("service '{service_id}' is not registered"))
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "eccd",
        "hostedServices": state.equipment.len(),
        "knownServices": state.registry.len(),
    }))
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Response {
    match &state.metrics {
        Some(registry) => metrics_handler(registry.clone()).await.into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics registry unavailable").into_response(),
    }
}

async fn get_equipment(State(state): State<Arc<ApiState>>) -> Json<Vec<ServiceIdentity>> {
    Json(state.equipment.clone())
}

async fn list_services(State(state): State<Arc<ApiState>>) -> Response {
    Json(state.registry.statuses()).into_response()
}

async fn get_service(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.registry.status(&id) {
        Some(status) => Json(status).into_response(),
        None => not_found(&id),
    }
}

async fn post_control(
    State(state): State<Arc<ApiState>>,
    Path((id, control_id)): Path<(String, String)>,
    Json(request): Json<ControlRequest>,
) -> Response {
    if state.registry.get(&id).is_none() {
        return not_found(&id);
    }
    let timeout = request.timeout_ms.map(Duration::from_millis);
    match state
        .client
        .send_command(&id, &control_id, request.value, timeout)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err @ CommandError::Timeout { .. }) => {
            error(StatusCode::GATEWAY_TIMEOUT, err.to_string())
        }
        Err(err @ CommandError::DeliveryFailed(_)) => {
            error(StatusCode::BAD_GATEWAY, err.to_string())
        }
        Err(err) => error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

fn provider_for(state: &ApiState, service_id: &str) -> Option<ServiceConfigProvider> {
    let record = state.registry.get(service_id)?;
    Some(
        ServiceConfigProvider::new(state.store.clone(), record.identity.service_name)
            .with_retry(&state.config_store),
    )
}

async fn get_service_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(provider) = provider_for(&state, &id) else {
        return not_found(&id);
    };
    match provider.settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

async fn put_service_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let Some(provider) = provider_for(&state, &id) else {
        return not_found(&id);
    };
    match provider.update_settings(&update).await {
        Ok(()) => Json(json!({ "message": "Configuration updated" })).into_response(),
        Err(err) => error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}
