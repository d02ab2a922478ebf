use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tracing::warn;

use crate::error::RelayError;
use crate::notifications::NotificationService;
use crate::registry::{ClosedGroupRegistry, DeviceRegistry, Identity};
use crate::router::{MembershipRequest, NotifyRequest, RegisterRequest, UnregisterRequest};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub groups: Arc<ClosedGroupRegistry>,
    pub notifications: NotificationService,
}

#[derive(Debug, Serialize)]
struct Ack {
    success: bool,
}

const ACK: Ack = Ack { success: true };

#[derive(Debug, Serialize)]
struct UnregisterResponse {
    success: bool,
    identity: Option<Identity>,
}

#[derive(Debug, Serialize)]
struct NotifyResponse {
    success: bool,
    enqueued: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::StorageUnavailable(_) | Self::QueueFull | Self::QueueClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Unwrap a JSON body, turning extractor rejections into validation errors.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, RelayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| RelayError::Validation(e.body_text()))
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let req = body(payload)?;
    state
        .devices
        .register(&req.identity, &req.token, req.platform)
        .await?;
    Ok(Json(ACK))
}

/// `POST /unregister`
pub async fn unregister(
    State(state): State<AppState>,
    payload: Result<Json<UnregisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let req = body(payload)?;
    let identity = state.devices.unregister(&req.token).await?;
    Ok(Json(UnregisterResponse {
        success: true,
        identity,
    }))
}

/// `POST /subscribe_closed_group`
pub async fn subscribe_closed_group(
    State(state): State<AppState>,
    payload: Result<Json<MembershipRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let req = body(payload)?;
    state.groups.subscribe(&req.group_id, &req.identity).await?;
    Ok(Json(ACK))
}

/// `POST /unsubscribe_closed_group`
pub async fn unsubscribe_closed_group(
    State(state): State<AppState>,
    payload: Result<Json<MembershipRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let req = body(payload)?;
    state.groups.unsubscribe(&req.group_id, &req.identity).await?;
    Ok(Json(ACK))
}

/// `POST /notify`
pub async fn notify(
    State(state): State<AppState>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let req = body(payload)?;
    let enqueued = state.notifications.notify(&req).await?;
    Ok(Json(NotifyResponse {
        success: true,
        enqueued,
    }))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// Build the management router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/unregister", post(unregister))
        .route("/subscribe_closed_group", post(subscribe_closed_group))
        .route("/unsubscribe_closed_group", post(unsubscribe_closed_group))
        .route("/notify", post(notify))
        .route("/health", get(health))
        .with_state(state)
}
