use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::put;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::Engine;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;
use crate::integrations::nefit_easy::Error as DeviceError;
use crate::integrations::nefit_easy::SettingsPatch;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    devices: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Body of a capability write
#[derive(Debug, Deserialize)]
struct SetCapabilityRequest {
    value: CapabilityValue,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Error returned by handlers, rendered as `{"error": "..."}`
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        let status = match &e {
            CommandError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            CommandError::IntegrationUnavailable(_) | CommandError::Dropped => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CommandError::Device(e) => device_error_status(e),
        };
        Self(status, e.to_string())
    }
}

fn device_error_status(e: &DeviceError) -> StatusCode {
    match e {
        DeviceError::NotWritable(_)
        | DeviceError::InvalidValue { .. }
        | DeviceError::InvalidSettings(_)
        | DeviceError::Credentials => StatusCode::BAD_REQUEST,
        DeviceError::Removed | DeviceError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        DeviceError::Duplicate(_) | DeviceError::RepairRequired => StatusCode::CONFLICT,
        DeviceError::NotConnected
        | DeviceError::Connection(_)
        | DeviceError::Sync(_)
        | DeviceError::Client(_) => StatusCode::BAD_GATEWAY,
        DeviceError::Storage { .. } | DeviceError::Persist(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            devices: state.engine.state_snapshot().devices.len(),
        }),
    )
}

/// Handler for GET /v1/devices
async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.state_snapshot().devices.clone())
}

/// Handler for GET /v1/devices/:id
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.engine.state_snapshot();
    let device = snapshot
        .devices
        .get(&id)
        .ok_or_else(|| ApiError::from(CommandError::UnknownDevice(id.clone())))?;
    Ok(Json(device).into_response())
}

/// Handler for PUT /v1/devices/:id/capabilities/:capability
#[tracing::instrument(skip(state))]
async fn set_capability(
    State(state): State<Arc<AppState>>,
    Path((id, capability)): Path<(String, String)>,
    Json(request): Json<SetCapabilityRequest>,
) -> Result<Response, ApiError> {
    let capability = Capability::from_str(&capability).map_err(|_| {
        ApiError(
            StatusCode::NOT_FOUND,
            format!("unknown capability '{}'", capability),
        )
    })?;

    let outcome = state
        .engine
        .set_capability(id, capability, request.value)
        .await?;
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)).into_response())
}

/// Handler for PUT /v1/devices/:id/settings
#[tracing::instrument(skip(state, patch))]
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Response, ApiError> {
    let settings = state.engine.update_settings(id, patch).await?;
    Ok(Json(settings).into_response())
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:id", get(get_device))
        .route(
            "/v1/devices/:id/capabilities/:capability",
            put(set_capability),
        )
        .route("/v1/devices/:id/settings", put(update_settings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
