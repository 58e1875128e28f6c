//! Workflow management REST API endpoints
//!
//! Registers, lists, exports, validates and unregisters named workflows.
//! Documents are imported through the resolver before registration, so a
//! registered workflow is always loadable.

use crate::{
    api::runs::RunSlot,
    error::WorkflowError,
    runtime::resolver::Resolver,
    workflow::{registry::WorkflowRegistry, validate::validate, Template, Workflow, WorkflowDocument},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Named workflow registry
    pub registry: Arc<WorkflowRegistry>,
    /// Binds imported steps to the device set
    pub resolver: Resolver,
    /// The active (or most recent) run
    pub runs: Arc<RunSlot>,
}

impl AppState {
    pub fn new(registry: Arc<WorkflowRegistry>, resolver: Resolver) -> Self {
        Self {
            registry,
            resolver,
            runs: Arc::new(RunSlot::default()),
        }
    }
}

/// Response for registration
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub name: String,
    pub step_count: usize,
    pub message: String,
}

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterWorkflowRequest {
    /// Registry name
    pub name: String,
    pub document: WorkflowDocument,
}

/// Request body for registering a template
#[derive(Debug, Deserialize)]
pub struct RegisterTemplateRequest {
    /// Registry name
    pub name: String,
}

/// HTTP status for a core error
pub(crate) fn status_for(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::WorkflowNotRegistered(_) => StatusCode::NOT_FOUND,
        WorkflowError::MalformedDocument(_)
        | WorkflowError::InvalidSpec(_)
        | WorkflowError::StepNotFound(_)
        | WorkflowError::DeviceConflict { .. }
        | WorkflowError::WorkflowEmpty => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(register_workflow))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{name}", get(get_workflow))
        .route("/api/workflows/{name}", axum::routing::delete(unregister_workflow))
        .route("/api/workflows/{name}/validate", post(validate_workflow))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/{template}", post(register_template))
}

/// Register a workflow document
///
/// POST /api/workflows
/// Body: { "name": "...", "document": { "workflow_name": "...", "steps": [...] } }
async fn register_workflow(
    State(state): State<AppState>,
    Json(payload): Json<RegisterWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    if payload.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let workflow = payload.document.into_workflow(&state.resolver).map_err(|e| {
        tracing::error!("Rejected workflow '{}': {}", payload.name, e);
        status_for(&e)
    })?;
    register_checked(&state, &payload.name, &workflow).await
}

async fn register_checked(
    state: &AppState,
    name: &str,
    workflow: &Workflow,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    validate(&workflow.steps).map_err(|e| {
        tracing::error!("Workflow '{}' failed validation: {}", name, e);
        status_for(&e)
    })?;

    let entry = state
        .registry
        .register(name, workflow, None)
        .await
        .map_err(|e| {
            tracing::error!("Failed to register workflow '{}': {}", name, e);
            status_for(&e)
        })?;

    tracing::info!("🔥 Registered workflow: {} ({} steps)", name, entry.step_count);

    Ok(Json(WorkflowResponse {
        name: name.to_string(),
        step_count: entry.step_count,
        message: format!("Workflow '{}' registered successfully", name),
    }))
}

/// List the built-in templates
///
/// GET /api/templates
async fn list_templates() -> Json<Value> {
    let templates: Vec<_> = Template::ALL.iter().map(Template::info).collect();
    Json(json!({ "templates": templates }))
}

/// Register a built-in template under a name
///
/// POST /api/templates/{template}
/// Body: { "name": "..." }
async fn register_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<RegisterTemplateRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let template = Template::from_key(&key).ok_or(StatusCode::NOT_FOUND)?;
    if payload.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let workflow = template.instantiate(&state.resolver).map_err(|e| {
        tracing::error!("Template {:?} did not resolve: {}", template, e);
        status_for(&e)
    })?;
    register_checked(&state, &payload.name, &workflow).await
}

/// List registered workflows
///
/// GET /api/workflows
/// Returns: { "workflows": { "<name>": { "file_path": "...", "step_count": 3, ... } } }
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "workflows": state.registry.list() }))
}

/// Export a registered workflow's document
///
/// GET /api/workflows/{name}
async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowDocument>, StatusCode> {
    match state.registry.load_by_name(&name, &state.resolver).await {
        Ok(workflow) => Ok(Json(WorkflowDocument::export(&workflow))),
        Err(e) => {
            tracing::error!("Failed to load workflow {}: {}", name, e);
            Err(status_for(&e))
        }
    }
}

/// Validate a registered workflow
///
/// POST /api/workflows/{name}/validate
/// Returns: { "valid": true, "report": {...} } or { "valid": false, "error": "..." }
async fn validate_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let workflow = state
        .registry
        .load_by_name(&name, &state.resolver)
        .await
        .map_err(|e| status_for(&e))?;

    match validate(&workflow.steps) {
        Ok(report) => Ok(Json(json!({ "valid": true, "report": report }))),
        Err(e) => Ok(Json(json!({ "valid": false, "error": e.to_string() }))),
    }
}

/// Unregister a workflow; its document stays on disk
///
/// DELETE /api/workflows/{name}
async fn unregister_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.registry.unregister(&name).await {
        Ok(true) => Ok(Json(json!({ "message": "Workflow unregistered successfully" }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to unregister workflow: {}", e);
            Err(status_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::runs::create_run_routes, config::RuntimeSettings, device::DeviceSet,
        workflow::storage::WorkflowStorage,
    };
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let registry = Arc::new(WorkflowRegistry::new(WorkflowStorage::new(dir)));
        let resolver = Resolver::new(Arc::new(DeviceSet::new()), Arc::new(RuntimeSettings::default()));
        create_workflow_routes()
            .merge(create_run_routes())
            .with_state(AppState::new(registry, resolver))
    }

    fn delay_document() -> Value {
        json!({
            "workflow_name": "Warmup",
            "steps": [{
                "id": "wait", "name": "wait", "type": "delay",
                "action_config": {"type": "delay", "seconds": 0.05},
                "wait_config": {"type": "none"},
                "timeout": 2.0, "created_at": 0.0
            }]
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn register_list_export_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows",
            Some(json!({"name": "warmup", "document": delay_document()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step_count"], 1);

        let (_, body) = send(&app, "GET", "/api/workflows", None).await;
        assert_eq!(body["workflows"]["warmup"]["name"], "Warmup");

        let (status, body) = send(&app, "GET", "/api/workflows/warmup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["steps"][0]["id"], "wait");

        let (_, body) = send(&app, "POST", "/api/workflows/warmup/validate", None).await;
        assert_eq!(body["valid"], true);

        let (status, _) = send(&app, "DELETE", "/api/workflows/warmup", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", "/api/workflows/warmup", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(dir.path().join("warmup.json").exists());
    }

    #[tokio::test]
    async fn templates_are_listed_and_registered() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = send(&app, "GET", "/api/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["templates"][1]["template"], "ice_coffee");
        assert_eq!(body["templates"][1]["step_count"], 7);

        let (status, body) = send(
            &app,
            "POST",
            "/api/templates/cleaning",
            Some(json!({"name": "nightly"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step_count"], 4);
        let (_, body) = send(&app, "GET", "/api/workflows/nightly", None).await;
        assert_eq!(body["workflow_name"], "Cleaning Cycle");
        assert_eq!(body["steps"][2]["id"], "wash_cup");

        let (status, _) = send(&app, "POST", "/api/templates/espresso", Some(json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let document = json!({"steps": [{"id": "x", "name": "x", "type": "teleport",
            "action_config": {"type": "none"}, "wait_config": {"type": "none"},
            "timeout": 1.0, "created_at": 0.0}]});
        let (status, _) = send(
            &app,
            "POST",
            "/api/workflows",
            Some(json!({"name": "bad", "document": document})),
        )
        .await;
        // unknown step types fail inside the JSON extractor
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, "GET", "/api/workflows/bad", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn runs_a_registered_workflow_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        send(
            &app,
            "POST",
            "/api/workflows",
            Some(json!({"name": "warmup", "document": delay_document()})),
        )
        .await;

        let (status, _) = send(&app, "GET", "/api/run/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/api/workflows/warmup/run", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut report = Value::Null;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let (_, body) = send(&app, "GET", "/api/run/status", None).await;
            report = body;
            if report["run_status"] == "completed" {
                break;
            }
        }
        assert_eq!(report["run_status"], "completed");
        assert_eq!(report["completed_step_names"], json!(["wait"]));

        let (status, _) = send(&app, "POST", "/api/run/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
