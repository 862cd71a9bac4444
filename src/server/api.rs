//! # Job API
//!
//! JSON handlers over [`JobOrchestrator`](crate::pipeline::JobOrchestrator).
//! Errors are returned as `{"error": ..., "retryable": ...}` with a status
//! code derived from the [`JobError`] variant.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::agents::AgentDescriptor;
use crate::error::JobError;
use crate::jobs::{
    CancelOutcome, GenerationRequest, JobId, JobResults, JobSnapshot, SubmitReceipt,
};
use crate::mindmap::{MindMapNode, MindMapView, NodeDetail, NodeId, ReplayCommand, ReplayResponse};
use crate::pipeline::PhasePlan;

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/results", get(get_results))
        .route("/jobs/:id/partial", get(get_partial_results))
        .route("/jobs/:id/mindmap", get(get_mind_map))
        .route("/jobs/:id/events", get(job_events))
        .route("/nodes/:id", get(get_node))
        .route("/nodes/:id/children", get(get_children))
        .route("/nodes/:id/replay", post(replay_node))
        .route("/nodes/:id/replay/stream", get(replay_stream))
        .route("/agents", get(list_agents))
        .route("/phases", get(get_phase_plan))
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::NotReady { .. } | JobError::InvalidTransition { .. } => StatusCode::CONFLICT,
            JobError::Registry(_)
            | JobError::MindMap(_)
            | JobError::Storage(_)
            | JobError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "Request failed");
        }
        Self {
            status,
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "retryable": self.retryable,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Malformed ids can never match a job, so they are reported as misses.
fn parse_job_id(raw: &str) -> Result<JobId, JobError> {
    raw.parse::<JobId>()
        .map_err(|_| JobError::NotFound(format!("job '{}'", raw)))
}

fn parse_node_id(raw: &str) -> Result<NodeId, JobError> {
    raw.parse::<NodeId>()
        .map_err(|_| JobError::NotFound(format!("node '{}'", raw)))
}

// ============================================================================
// Jobs
// ============================================================================

async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitReceipt>)> {
    let Json(request) = payload?;
    let receipt = state.orchestrator.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.orchestrator.list_jobs().await)
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.get_status(job_id).await?))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    job_id: JobId,
    outcome: CancelOutcome,
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = parse_job_id(&id)?;
    let outcome = state.orchestrator.cancel(job_id).await?;
    Ok(Json(CancelResponse { job_id, outcome }))
}

async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResults>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.get_results(job_id).await?))
}

async fn get_partial_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResults>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.partial_results(job_id).await?))
}

async fn get_mind_map(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MindMapView>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.orchestrator.get_mind_map(job_id).await?))
}

/// Streams a job's events as SSE.
///
/// The first event is a `status` snapshot. The stream ends after
/// `job_finished`, or immediately if the job is already terminal.
async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = parse_job_id(&id)?;

    // Subscribe before the snapshot so nothing falls between the two.
    let receiver = state.orchestrator.subscribe();
    let snapshot = state.orchestrator.get_status(job_id).await?;

    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(sse_event("status", &snapshot));

        if !snapshot.status.is_terminal() {
            let mut events = BroadcastStream::new(receiver);
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) if event.job_id() == job_id => {
                        let terminal = event.is_terminal();
                        yield Ok(sse_event(event.name(), &event));
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(job_id = %job_id, skipped, "Event subscriber lagged");
                    }
                }
            }
        }
        debug!(job_id = %job_id, "Event stream closed");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(name: &str, payload: &impl Serialize) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

// ============================================================================
// Nodes
// ============================================================================

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NodeDetail>> {
    let node_id = parse_node_id(&id)?;
    Ok(Json(state.orchestrator.select_node(node_id)?))
}

async fn get_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MindMapNode>>> {
    let node_id = parse_node_id(&id)?;
    Ok(Json(state.orchestrator.get_children(node_id)?))
}

/// Replays a subtree. An empty body means `play`.
async fn replay_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<ReplayResponse>> {
    let node_id = parse_node_id(&id)?;
    let command = if body.iter().all(u8::is_ascii_whitespace) {
        ReplayCommand::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid replay command: {}", e)))?
    };
    Ok(Json(state.orchestrator.replay(node_id, command)?))
}

async fn replay_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let node_id = parse_node_id(&id)?;
    let frames = state.orchestrator.replay_stream(node_id)?;
    let stream = frames.map(|frame| Ok(sse_event("frame", &frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Catalog
// ============================================================================

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentDescriptor>> {
    Json(state.orchestrator.agents())
}

async fn get_phase_plan(State(state): State<AppState>) -> Json<PhasePlan> {
    Json(state.orchestrator.plan().clone())
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "jobs": state.orchestrator.list_jobs().await.len(),
        "agents": state.orchestrator.agents().len(),
    }))
}
