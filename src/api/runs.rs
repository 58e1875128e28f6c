//! Run control endpoints
//!
//! One run at a time: starting a run while another is active is a conflict.
//! The last run's reporter stays in the slot so its final status can be read.

use crate::{
    api::workflows::{status_for, AppState},
    runtime::{sequencer::Sequencer, status::StatusReporter},
    workflow::validate::validate,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A started run
struct ActiveRun {
    workflow_name: String,
    reporter: StatusReporter,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Holder of the active or most recent run
#[derive(Default)]
pub struct RunSlot {
    current: Mutex<Option<ActiveRun>>,
}

/// Create run control routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{name}/run", post(start_run))
        .route("/api/run/status", get(run_status))
        .route("/api/run/cancel", post(cancel_run))
}

/// Start a registered workflow in the background
///
/// POST /api/workflows/{name}/run
async fn start_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let mut slot = state.runs.current.lock().await;
    if let Some(run) = slot.as_ref().filter(|run| run.is_active()) {
        tracing::warn!("⚠️ Run of '{}' is still active", run.workflow_name);
        return Err(StatusCode::CONFLICT);
    }

    let workflow = state
        .registry
        .load_by_name(&name, &state.resolver)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load workflow {}: {}", name, e);
            status_for(&e)
        })?;
    // surface configuration faults here rather than in a detached task
    if workflow.steps.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    validate(&workflow.steps).map_err(|e| {
        tracing::error!("Workflow '{}' failed validation: {}", name, e);
        status_for(&e)
    })?;

    let mut sequencer = Sequencer::new(workflow);
    let reporter = sequencer.reporter();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let run_name = name.clone();
    let handle = tokio::spawn(async move {
        match sequencer.run(token).await {
            Ok(outcome) => tracing::info!("🏁 Run of '{}' ended: {:?}", run_name, outcome.status),
            Err(e) => tracing::error!("❌ Run of '{}' aborted: {}", run_name, e),
        }
    });

    *slot = Some(ActiveRun {
        workflow_name: name.clone(),
        reporter,
        cancel,
        handle,
    });
    tracing::info!("▶️ Started run of '{}'", name);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": format!("Run of '{}' started", name) })),
    ))
}

/// Status snapshot of the active or most recent run
///
/// GET /api/run/status
async fn run_status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let slot = state.runs.current.lock().await;
    let run = slot.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    serde_json::to_value(run.reporter.snapshot())
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Cancel the active run
///
/// POST /api/run/cancel
async fn cancel_run(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let slot = state.runs.current.lock().await;
    match slot.as_ref().filter(|run| run.is_active()) {
        Some(run) => {
            run.cancel.cancel();
            tracing::info!("🛑 Cancellation requested for '{}'", run.workflow_name);
            Ok(Json(json!({ "message": format!("Run of '{}' cancelling", run.workflow_name) })))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}
