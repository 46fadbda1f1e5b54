//! HTTP surface.
//!
//! `POST /registers` validates and resolves a frame in the request, then
//! hands it to the queue. Read endpoints serve the telemetry snapshot,
//! active DTCs and replays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::IngestError;
use crate::logging::structured::LogContext;
use crate::pipeline::{build_replay, FrameContext, FrameSource, Ingestor, ReplayError};
use crate::queue::{EnqueueError, QueueHandle};
use crate::validation::{parse_device_timestamp, FieldErrors, Frame};

/// How long `POST /registers` waits for queue room.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

const GENERIC_SERVER_ERROR: &str = "Server Error";

pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub queue: QueueHandle,
    /// Hide internal error detail from 500 responses.
    pub production: bool,
    pub enqueue_timeout: Duration,
    started_at: Instant,
}

impl AppState {
    pub fn new(ingestor: Arc<Ingestor>, queue: QueueHandle, production: bool) -> Self {
        Self {
            ingestor,
            queue,
            production,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            started_at: Instant::now(),
        }
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    fn internal(&self, ctx: &LogContext, err: impl std::fmt::Display) -> ApiError {
        log::error!("{} HTTP_INTERNAL_ERROR error={}", ctx, err);
        let message = if self.production {
            GENERIC_SERVER_ERROR.to_string()
        } else {
            err.to_string()
        };
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn reject(&self, ctx: &LogContext, err: IngestError) -> ApiError {
        match err {
            IngestError::Validation(e) => ApiError::unprocessable(e.field_errors()),
            IngestError::NotFound { entity, key } => {
                ApiError::new(StatusCode::NOT_FOUND, format!("{} not found: {}", entity, key))
            }
            other => self.internal(ctx, other),
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: None,
        }
    }

    fn unprocessable(errors: FieldErrors) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "The given data was invalid.".to_string(),
            errors: Some(errors),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/registers", post(register))
        .route("/vehicles/:id/telemetry", get(vehicle_telemetry))
        .route("/vehicles/:id/dtcs", get(vehicle_dtcs))
        .route("/vehicles/:id/replay", get(vehicle_replay))
        .route("/dtcs/:id/resolve", post(resolve_dtc))
        .with_state(state)
}

fn request_context() -> LogContext {
    FrameContext::new(FrameSource::Http).log_context()
}

/// Run store-backed work on the blocking pool.
async fn blocking<T, F>(state: &AppState, ctx: &LogContext, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(state.internal(ctx, e)),
    }
}

async fn ensure_vehicle(state: &Arc<AppState>, ctx: &LogContext, vehicle_id: i64) -> Result<(), ApiError> {
    let shared = Arc::clone(state);
    let task_ctx = ctx.clone();
    blocking(state, ctx, move || {
        match shared.ingestor.store().vehicle_exists(vehicle_id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("vehicle not found: {}", vehicle_id),
            )),
            Err(e) => Err(shared.internal(&task_ctx, e)),
        }
    })
    .await
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let body = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "queue": {
            "depth": state.queue.depth(),
            "capacity": state.queue.capacity(),
            "stats": state.queue.stats(),
        },
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /registers
async fn register(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let frame_ctx = FrameContext::new(FrameSource::Http);
    let frame = match Frame::from_slice(&body) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!(
                "{} HTTP_FRAME_REJECTED bytes={} error={}",
                frame_ctx.log_context(),
                body.len(),
                e
            );
            return Err(ApiError::unprocessable(e.field_errors()));
        }
    };

    let log_ctx = frame_ctx
        .log_context()
        .with_device(&frame.device_serial)
        .with_vehicle(&frame.vehicle_vin);

    let frame = {
        let shared = Arc::clone(&state);
        let task_ctx = log_ctx.clone();
        blocking(&state, &log_ctx, move || {
            match shared.ingestor.resolve_target(&frame, &task_ctx) {
                Ok(_) => Ok(frame),
                Err(e) => {
                    log::warn!("{} HTTP_TARGET_UNRESOLVED error={}", task_ctx, e);
                    Err(shared.reject(&task_ctx, e))
                }
            }
        })
        .await?
    };

    let frame_id = frame_ctx.frame_id.clone();
    match state
        .queue
        .enqueue_timeout(frame, frame_ctx, state.enqueue_timeout)
        .await
    {
        Ok(()) => {
            log::debug!("{} HTTP_FRAME_QUEUED", log_ctx);
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({"status": "success", "frame_id": frame_id})),
            )
                .into_response())
        }
        Err(e @ (EnqueueError::Full(_) | EnqueueError::Timeout(..))) => {
            log::warn!("{} HTTP_QUEUE_SATURATED error={}", log_ctx, e);
            Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "queue saturated"))
        }
        Err(e @ EnqueueError::Closed(_)) => {
            log::error!("{} HTTP_QUEUE_CLOSED error={}", log_ctx, e);
            Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "queue unavailable"))
        }
    }
}

/// GET /vehicles/:id/telemetry
async fn vehicle_telemetry(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<i64>,
) -> Result<Response, ApiError> {
    let ctx = request_context();
    ensure_vehicle(&state, &ctx, vehicle_id).await?;

    let shared = Arc::clone(&state);
    let task_ctx = ctx.clone();
    let snapshot = blocking(&state, &ctx, move || {
        shared
            .ingestor
            .telemetry_snapshot(vehicle_id, &task_ctx)
            .map_err(|e| shared.reject(&task_ctx, e))
    })
    .await?;
    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

/// GET /vehicles/:id/dtcs
async fn vehicle_dtcs(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<i64>,
) -> Result<Response, ApiError> {
    let ctx = request_context();
    ensure_vehicle(&state, &ctx, vehicle_id).await?;

    let shared = Arc::clone(&state);
    let task_ctx = ctx.clone();
    let (dtcs, source) = blocking(&state, &ctx, move || {
        shared
            .ingestor
            .dtcs()
            .active_dtcs(vehicle_id, &task_ctx)
            .map_err(|e| shared.reject(&task_ctx, e))
    })
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({"vehicle_id": vehicle_id, "source": source, "dtcs": dtcs})),
    )
        .into_response())
}

/// POST /dtcs/:id/resolve
async fn resolve_dtc(
    State(state): State<Arc<AppState>>,
    Path(dtc_id): Path<i64>,
) -> Result<Response, ApiError> {
    let ctx = request_context();
    let shared = Arc::clone(&state);
    let task_ctx = ctx.clone();
    let dtc = blocking(&state, &ctx, move || {
        let now = shared.ingestor.now();
        shared
            .ingestor
            .dtcs()
            .resolve(dtc_id, now, &task_ctx)
            .map_err(|e| shared.reject(&task_ctx, e))
    })
    .await?;
    Ok((StatusCode::OK, Json(dtc)).into_response())
}

#[derive(Debug, Deserialize)]
struct ReplayQuery {
    from: Option<String>,
    to: Option<String>,
}

/// GET /vehicles/:id/replay?from=&to=
async fn vehicle_replay(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<i64>,
    Query(query): Query<ReplayQuery>,
) -> Result<Response, ApiError> {
    let mut errors = FieldErrors::new();
    let mut bound = |field: &str, raw: Option<&str>| {
        let parsed = raw.and_then(parse_device_timestamp);
        if parsed.is_none() {
            errors
                .entry(field.to_string())
                .or_default()
                .push(format!("The {} field must be a valid timestamp.", field));
        }
        parsed
    };
    let from = bound("from", query.from.as_deref());
    let to = bound("to", query.to.as_deref());
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        _ => return Err(ApiError::unprocessable(errors)),
    };

    let ctx = request_context();
    ensure_vehicle(&state, &ctx, vehicle_id).await?;

    let shared = Arc::clone(&state);
    let task_ctx = ctx.clone();
    let replay = blocking(&state, &ctx, move || {
        match build_replay(shared.ingestor.store().as_ref(), vehicle_id, from, to) {
            Ok(replay) => Ok(replay),
            Err(e @ ReplayError::InvalidWindow { .. }) => Err(ApiError::unprocessable(
                FieldErrors::from([("from".to_string(), vec![e.to_string()])]),
            )),
            Err(ReplayError::Store(e)) => Err(shared.internal(&task_ctx, e)),
        }
    })
    .await?;
    Ok((StatusCode::OK, Json(replay)).into_response())
}
