//! API route handlers, all mounted under `/api`.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use designer_core::{CompileReport, CompileTarget, Compiler, DeviceSummary, IssueKind};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{ok, ApiError, ApiResult};
use crate::metrics;
use crate::validation::{
    validate_asset_payload, validate_device_id, validate_entity_id, validate_label,
    validate_recipe_id, validate_recipe_yaml, validate_widget_type, ValidationError,
    MAX_ASSET_BASE64_LEN, MAX_RECIPE_ID_LEN,
};
use crate::AppState;

/// Request body limit for asset uploads (base64 payload plus JSON framing).
const UPLOAD_BODY_LIMIT: usize = MAX_ASSET_BASE64_LEN + 4096;

/// Build the `/api` router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/devices",
            get(list_devices).post(upsert_device).delete(delete_device),
        )
        .route(
            "/devices/{device_id}/project",
            get(get_project).put(put_project),
        )
        .route("/devices/{device_id}/project/export", get(export_project))
        .route("/devices/{device_id}/project/import", post(import_project))
        .route("/devices/{device_id}/export", post(export_device))
        .route("/devices/{device_id}/export/preview", post(preview_device))
        .route("/schemas/widgets", get(list_schemas))
        .route("/schemas/widgets/{widget_type}", get(get_schema))
        .route("/recipes", get(list_recipes))
        .route("/recipes/validate", post(validate_recipe))
        .route("/recipes/import", post(import_recipe))
        .route("/recipes/clone", post(clone_recipe))
        .route("/recipes/{recipe_id}/export", get(export_recipe))
        .route(
            "/recipes/user/{recipe_id}",
            patch(update_recipe).delete(delete_recipe),
        )
        .route(
            "/ha/entities/{entity_id}/capabilities",
            get(entity_capabilities),
        )
        .route("/assets", get(list_assets))
        .route(
            "/assets/upload",
            post(upload_asset).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
}

// ---------------------------------------------------------------------------
// Devices and projects
// ---------------------------------------------------------------------------

/// Body of `POST /api/devices`: the device summary plus an optional project.
#[derive(Debug, Deserialize)]
pub struct UpsertDeviceRequest {
    /// Device fields.
    #[serde(flatten)]
    pub device: DeviceSummary,
    /// Replacement project; the stored one is kept when absent.
    #[serde(default)]
    pub project: Option<Value>,
}

/// Query of `DELETE /api/devices`.
#[derive(Debug, Deserialize)]
pub struct DeleteDeviceQuery {
    /// Device to remove.
    pub device_id: String,
}

/// Body of `PUT /api/devices/{id}/project`.
#[derive(Debug, Deserialize)]
pub struct PutProjectRequest {
    /// New project document.
    pub project: Value,
}

#[tracing::instrument(name = "list_devices", skip(state))]
async fn list_devices(State(state): State<AppState>) -> ApiResult {
    ok(json!({ "devices": state.devices.list() }))
}

#[tracing::instrument(name = "upsert_device", skip(state, payload))]
async fn upsert_device(
    State(state): State<AppState>,
    payload: Result<Json<UpsertDeviceRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    validate_device_id(&request.device.device_id)?;
    if let Some(recipe_id) = &request.device.hardware_recipe_id {
        validate_recipe_id(recipe_id)?;
    }
    let device = state.devices.upsert(request.device, request.project)?;
    tracing::info!(device_id = %device.device_id, "Device saved");
    ok(json!({ "device": device }))
}

#[tracing::instrument(name = "delete_device", skip(state, query))]
async fn delete_device(
    State(state): State<AppState>,
    query: Result<Query<DeleteDeviceQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_device_id(&query.device_id)?;
    state.devices.delete(&query.device_id)?;
    tracing::info!(device_id = %query.device_id, "Device deleted");
    ok(json!({}))
}

#[tracing::instrument(name = "get_project", skip(state))]
async fn get_project(State(state): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    validate_device_id(&device_id)?;
    let project = state.devices.project(&device_id)?;
    ok(json!({ "project": project }))
}

#[tracing::instrument(name = "put_project", skip(state, payload))]
async fn put_project(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    payload: Result<Json<PutProjectRequest>, JsonRejection>,
) -> ApiResult {
    validate_device_id(&device_id)?;
    let Json(request) = payload?;
    state.devices.set_project(&device_id, request.project)?;
    ok(json!({}))
}

/// A project backup as produced by `GET /api/devices/{id}/project/export`.
#[derive(Debug, Deserialize)]
pub struct ProjectBackup {
    /// Project document.
    pub project: Value,
    /// Recipe to assign: a string sets it, an empty string clears it, and
    /// anything else leaves the device's recipe alone.
    #[serde(default)]
    pub hardware_recipe_id: Option<Value>,
}

/// Body of `POST /api/devices/{id}/project/import`.
#[derive(Debug, Deserialize)]
pub struct ImportProjectRequest {
    /// The backup to restore.
    pub export: ProjectBackup,
}

#[tracing::instrument(name = "export_project", skip(state))]
async fn export_project(State(state): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    let device = lookup_device(&state, &device_id)?;
    let project = state.devices.project(&device_id)?;
    ok(json!({
        "export": {
            "device_id": device.device_id,
            "slug": device.slug,
            "name": device.name,
            "hardware_recipe_id": device.hardware_recipe_id,
            "project": project,
        }
    }))
}

#[tracing::instrument(name = "import_project", skip(state, payload))]
async fn import_project(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    payload: Result<Json<ImportProjectRequest>, JsonRejection>,
) -> ApiResult {
    let mut device = lookup_device(&state, &device_id)?;
    let Json(request) = payload?;
    let ProjectBackup {
        mut project,
        hardware_recipe_id,
    } = request.export;
    let Some(doc) = project.as_object_mut() else {
        return Err(ApiError::BadRequest(
            "export.project must be an object".to_string(),
        ));
    };
    // Unversioned backups predate the version field.
    doc.entry("model_version").or_insert(json!(1));
    match hardware_recipe_id {
        Some(Value::String(id)) if id.trim().is_empty() => device.hardware_recipe_id = None,
        Some(Value::String(id)) => {
            validate_recipe_id(&id)?;
            device.hardware_recipe_id = Some(id);
        }
        _ => {}
    }
    let device = state.devices.upsert(device, Some(project))?;
    tracing::info!(device_id = %device.device_id, "Project restored from backup");
    ok(json!({ "device": device }))
}

// ---------------------------------------------------------------------------
// Compile, preview, export
// ---------------------------------------------------------------------------

/// Body of `POST /api/devices/{id}/export`. The body may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// Hash the caller last previewed. Omit to deploy unconditionally;
    /// an empty string means "nothing deployed yet".
    #[serde(default)]
    pub expected_hash: Option<String>,
}

/// Parse a JSON body that may be empty.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn lookup_device(state: &AppState, device_id: &str) -> Result<DeviceSummary, ApiError> {
    validate_device_id(device_id)?;
    state
        .devices
        .get(device_id)
        .ok_or_else(|| ApiError::DeviceNotFound(device_id.to_string()))
}

/// Compile a device's stored project against the current registry,
/// resolver, recipes and assets.
async fn compile_device(
    state: &AppState,
    device: &DeviceSummary,
    mode: &str,
) -> Result<CompileReport, ApiError> {
    let project = state.devices.project(&device.device_id)?;
    let assets = state.assets.index()?;
    let mut target = CompileTarget::new(&device.device_id, &device.slug).with_assets(assets);
    if let Some(recipe_id) = &device.hardware_recipe_id {
        target = target.with_recipe(recipe_id);
    }

    let compiler = Compiler::new(&state.registry, state.resolver.as_ref(), &state.recipes);
    let started = Instant::now();
    let report = compiler.compile(&project, &target).await;

    let outcome = if report.artifact.is_some() {
        "ok"
    } else if report.is_retryable() {
        "deferred"
    } else {
        "failed"
    };
    metrics::record_compile(mode, outcome, started.elapsed());
    for issue in &report.issues {
        metrics::record_compile_issue(issue.kind.code());
    }
    tracing::debug!(
        device_id = %device.device_id,
        outcome,
        issues = report.issues.len(),
        "Compiled project"
    );

    if report.artifact.is_none() && report.is_retryable() {
        let deferred = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::BindingResolutionDeferred)
            .count();
        return Err(ApiError::ResolverUnavailable {
            message: format!("{deferred} binding(s) could not be checked"),
            issues: report.issues,
        });
    }
    Ok(report)
}

#[tracing::instrument(name = "export_device", skip(state, body))]
async fn export_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: ExportRequest = optional_body(&body)?;
    let device = lookup_device(&state, &device_id)?;
    let report = compile_device(&state, &device, "export").await?;

    let Some(artifact) = report.artifact else {
        return ok(json!({ "issues": report.issues }));
    };

    let result = state
        .deployer
        .deploy(&device, &artifact, request.expected_hash.as_deref())
        .await;
    let outcome = match &result {
        Ok(o) if o.changed => "written",
        Ok(_) => "unchanged",
        Err(designer_core::DeployError::Conflict { .. }) => "conflict",
        Err(_) => "error",
    };
    metrics::record_deploy(outcome);
    let deployed = result?;

    ok(json!({
        "path": deployed.path.display().to_string(),
        "hash": deployed.hash,
        "previous_hash": deployed.previous_hash,
        "changed": deployed.changed,
        "issues": report.issues,
    }))
}

#[tracing::instrument(name = "preview_device", skip(state))]
async fn preview_device(State(state): State<AppState>, Path(device_id): Path<String>) -> ApiResult {
    let device = lookup_device(&state, &device_id)?;
    let report = compile_device(&state, &device, "preview").await?;

    let Some(artifact) = report.artifact else {
        return ok(json!({
            "artifact": null,
            "hash": null,
            "current_hash": state.deployer.current_hash(&device.device_id),
            "changed": false,
            "issues": report.issues,
        }));
    };

    let preview = state.deployer.preview(&device.device_id, artifact);
    ok(json!({
        "artifact": preview.artifact.yaml,
        "hash": preview.artifact.hash,
        "current_hash": preview.current_hash,
        "changed": preview.changed,
        "issues": report.issues,
    }))
}

// ---------------------------------------------------------------------------
// Schemas and recipes
// ---------------------------------------------------------------------------

#[tracing::instrument(name = "list_schemas", skip(state))]
async fn list_schemas(State(state): State<AppState>) -> ApiResult {
    ok(json!({ "schemas": state.registry.list() }))
}

#[tracing::instrument(name = "get_schema", skip(state))]
async fn get_schema(State(state): State<AppState>, Path(widget_type): Path<String>) -> ApiResult {
    validate_widget_type(&widget_type)?;
    let schema = state.registry.get(&widget_type)?;
    ok(json!({ "schema": schema }))
}

#[tracing::instrument(name = "list_recipes", skip(state))]
async fn list_recipes(State(state): State<AppState>) -> ApiResult {
    let recipes = state.recipes.list()?;
    ok(json!({ "recipes": recipes }))
}

/// Body of `POST /api/recipes/validate`.
#[derive(Debug, Deserialize)]
pub struct ValidateRecipeRequest {
    /// Recipe to check.
    pub recipe_id: String,
}

#[tracing::instrument(name = "validate_recipe", skip(state, payload))]
async fn validate_recipe(
    State(state): State<AppState>,
    payload: Result<Json<ValidateRecipeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    validate_recipe_id(&request.recipe_id)?;
    let report = state.recipes.validate(&request.recipe_id)?;
    let usable = report.is_usable();
    let mut body = serde_json::to_value(&report).map_err(|e| ApiError::Internal(e.to_string()))?;
    body["usable"] = Value::Bool(usable);
    ok(body)
}

#[tracing::instrument(name = "export_recipe", skip(state))]
async fn export_recipe(State(state): State<AppState>, Path(recipe_id): Path<String>) -> ApiResult {
    validate_recipe_id(&recipe_id)?;
    let recipe = state.recipes.export(&recipe_id)?;
    ok(json!({ "recipe": recipe }))
}

/// Body of `POST /api/recipes/import`.
#[derive(Debug, Deserialize)]
pub struct ImportRecipeRequest {
    /// Full ESPHome YAML; device-level sections are dropped.
    pub yaml: String,
    /// Preferred id, slugified and suffixed when taken.
    #[serde(default)]
    pub recipe_id: Option<String>,
    /// Label; derived from the board and resolution when absent.
    #[serde(default)]
    pub label: Option<String>,
}

#[tracing::instrument(name = "import_recipe", skip(state, payload))]
async fn import_recipe(
    State(state): State<AppState>,
    payload: Result<Json<ImportRecipeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    validate_recipe_yaml(&request.yaml)?;
    if request
        .recipe_id
        .as_ref()
        .is_some_and(|id| id.len() > MAX_RECIPE_ID_LEN)
    {
        return Err(ValidationError::RecipeIdInvalid.into());
    }
    if let Some(label) = &request.label {
        validate_label(label)?;
    }
    let result = state.recipes.import(
        &request.yaml,
        request.recipe_id.as_deref(),
        request.label.as_deref(),
    );
    metrics::record_recipe_change("import", result.is_ok());
    let saved = result?;
    tracing::info!(recipe_id = %saved.id, "Recipe imported");
    ok(json!({ "recipe": saved }))
}

/// Body of `POST /api/recipes/clone`.
#[derive(Debug, Deserialize)]
pub struct CloneRecipeRequest {
    /// Recipe to copy, builtin or user.
    pub source_id: String,
    /// Id for the copy; defaults to the source id with a numeric suffix.
    #[serde(default)]
    pub recipe_id: Option<String>,
    /// Label for the copy.
    #[serde(default)]
    pub label: Option<String>,
}

#[tracing::instrument(name = "clone_recipe", skip(state, payload))]
async fn clone_recipe(
    State(state): State<AppState>,
    payload: Result<Json<CloneRecipeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    validate_recipe_id(&request.source_id)?;
    if let Some(id) = &request.recipe_id {
        validate_recipe_id(id)?;
    }
    if let Some(label) = &request.label {
        validate_label(label)?;
    }
    let result = state.recipes.clone_recipe(
        &request.source_id,
        request.recipe_id.as_deref(),
        request.label.as_deref(),
    );
    metrics::record_recipe_change("clone", result.is_ok());
    let saved = result?;
    tracing::info!(source_id = %request.source_id, recipe_id = %saved.id, "Recipe cloned");
    ok(json!({ "recipe": saved }))
}

/// Body of `PATCH /api/recipes/user/{id}`. At least one field is required.
#[derive(Debug, Deserialize)]
pub struct UpdateRecipeRequest {
    /// New label.
    #[serde(default)]
    pub label: Option<String>,
    /// Replacement YAML text.
    #[serde(default)]
    pub yaml: Option<String>,
}

#[tracing::instrument(name = "update_recipe", skip(state, payload))]
async fn update_recipe(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    payload: Result<Json<UpdateRecipeRequest>, JsonRejection>,
) -> ApiResult {
    validate_recipe_id(&recipe_id)?;
    let Json(request) = payload?;
    if request.label.is_none() && request.yaml.is_none() {
        return Err(ApiError::BadRequest(
            "nothing to update: give label or yaml".to_string(),
        ));
    }
    if let Some(label) = &request.label {
        validate_label(label)?;
    }
    if let Some(yaml) = &request.yaml {
        validate_recipe_yaml(yaml)?;
    }
    let result = state.recipes.save(
        &recipe_id,
        request.yaml.as_deref(),
        request.label.as_deref(),
    );
    metrics::record_recipe_change("update", result.is_ok());
    let saved = result?;
    ok(json!({ "recipe": saved }))
}

#[tracing::instrument(name = "delete_recipe", skip(state))]
async fn delete_recipe(State(state): State<AppState>, Path(recipe_id): Path<String>) -> ApiResult {
    validate_recipe_id(&recipe_id)?;
    let result = state.recipes.delete(&recipe_id);
    metrics::record_recipe_change("delete", result.is_ok());
    result?;
    ok(json!({}))
}

// ---------------------------------------------------------------------------
// Entities and assets
// ---------------------------------------------------------------------------

#[tracing::instrument(name = "entity_capabilities", skip(state))]
async fn entity_capabilities(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult {
    validate_entity_id(&entity_id)?;
    let capabilities = state.resolver.resolve(&entity_id).await?;
    ok(json!({ "capabilities": capabilities }))
}

#[tracing::instrument(name = "list_assets", skip(state))]
async fn list_assets(State(state): State<AppState>) -> ApiResult {
    let assets = state.assets.list()?;
    ok(json!({ "assets": assets }))
}

/// Body of `POST /api/assets/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadAssetRequest {
    /// File name.
    pub name: String,
    /// File content, standard base64.
    pub data_base64: String,
}

#[tracing::instrument(name = "upload_asset", skip(state, payload))]
async fn upload_asset(
    State(state): State<AppState>,
    payload: Result<Json<UploadAssetRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    validate_asset_payload(&request.data_base64)?;
    let bytes = BASE64
        .decode(request.data_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64 payload: {e}")))?;

    let result = state.assets.upload(&request.name, &bytes);
    metrics::record_asset_upload(result.is_ok());
    let info = result?;
    tracing::info!(name = %info.name, size = info.size, "Asset uploaded");
    ok(json!({ "asset": info }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use designer_core::{CapabilitySet, StaticCapabilities, ValueKind};
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> AppState {
        let config = crate::config::ServerConfig::new(dir);
        AppState::from_config(&config).expect("state")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn router(state: AppState) -> Router {
        Router::new().nest("/api", api_router()).with_state(state)
    }

    #[test]
    fn test_optional_body() {
        let empty: ExportRequest = optional_body(&Bytes::new()).expect("empty");
        assert!(empty.expected_hash.is_none());
        let blank: ExportRequest = optional_body(&Bytes::from_static(b"  \n")).expect("blank");
        assert!(blank.expected_hash.is_none());
        let given: ExportRequest =
            optional_body(&Bytes::from_static(br#"{"expected_hash":"abc"}"#)).expect("given");
        assert_eq!(given.expected_hash.as_deref(), Some("abc"));
        assert!(optional_body::<ExportRequest>(&Bytes::from_static(b"{nope")).is_err());
    }

    #[tokio::test]
    async fn test_upsert_then_list_devices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());

        let (status, body) = send(
            router(state.clone()),
            json_request("POST", "/api/devices", &json!({"device_id": "kitchen", "name": "Kitchen"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["device"]["slug"], "kitchen");

        let request = Request::get("/api/devices").body(Body::empty()).expect("request");
        let (_, body) = send(router(state), request).await;
        assert_eq!(body["devices"][0]["device_id"], "kitchen");
    }

    #[tokio::test]
    async fn test_invalid_device_id_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());

        let (status, body) = send(
            router(state),
            json_request("POST", "/api/devices", &json!({"device_id": "../etc"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_device_project_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = Request::get("/api/devices/ghost/project")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(test_state(dir.path())), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "device_not_found");
    }

    #[tokio::test]
    async fn test_export_with_unreachable_resolver_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let project = json!({
            "model_version": 2,
            "pages": [{"page_id": "main", "widgets": [
                {"id": "t", "type": "label", "props": {"text": "--"}}
            ]}],
            "bindings": [{"widget_id": "t", "property": "text", "entity_id": "sensor.temp"}]
        });
        state
            .devices
            .upsert(DeviceSummary::new("panel"), Some(project))
            .expect("upsert");

        let request = Request::post("/api/devices/panel/export")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(state.clone()), request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "resolver_unavailable");
        assert_eq!(body["issues"][0]["kind"], "binding_resolution_deferred");
        assert!(state.deployer.current_hash("panel").is_none());
    }

    #[tokio::test]
    async fn test_entity_capabilities_from_resolver() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = StaticCapabilities::new()
            .with(CapabilitySet::new("light.kitchen", ValueKind::Boolean).with_service("toggle"));
        let state = test_state(dir.path()).with_resolver(Arc::new(resolver));

        let request = Request::get("/api/ha/entities/light.kitchen/capabilities")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capabilities"]["state"], "boolean");
        assert_eq!(body["capabilities"]["services"][0], "toggle");

        let request = Request::get("/api/ha/entities/light.attic/capabilities")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(state), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "entity_not_found");
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (status, body) = send(
            router(test_state(dir.path())),
            json_request(
                "POST",
                "/api/assets/upload",
                &json!({"name": "logo.png", "data_base64": "***"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap_or_default().contains("base64"));
    }

    #[tokio::test]
    async fn test_validate_unknown_recipe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (status, body) = send(
            router(test_state(dir.path())),
            json_request("POST", "/api/recipes/validate", &json!({"recipe_id": "no_such_board"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "recipe_not_found");
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn test_clone_update_export_delete_recipe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());

        let (status, body) = send(
            router(state.clone()),
            json_request(
                "POST",
                "/api/recipes/clone",
                &json!({"source_id": "sunton_2432s028r_320x240", "label": "Desk"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["recipe"]["id"].as_str().expect("id").to_string();
        assert_eq!(id, "sunton_2432s028r_320x240_2");
        assert_eq!(body["recipe"]["report"]["recipe_id"], id.as_str());

        let (status, body) = send(
            router(state.clone()),
            json_request("PATCH", &format!("/api/recipes/user/{id}"), &json!({"label": "Kitchen"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipe"]["label"], "Kitchen");

        let (status, body) = send(
            router(state.clone()),
            empty_request("GET", &format!("/api/recipes/{id}/export")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipe"]["source"], "user");
        assert_eq!(body["recipe"]["label"], "Kitchen");
        assert_eq!(body["recipe"]["metadata"]["cloned_from"], "sunton_2432s028r_320x240");

        let (status, _) = send(
            router(state.clone()),
            empty_request("DELETE", &format!("/api/recipes/user/{id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(
            router(state),
            empty_request("DELETE", &format!("/api/recipes/user/{id}")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "recipe_not_found");
    }

    #[tokio::test]
    async fn test_builtin_recipes_are_read_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());

        let (status, body) = send(
            router(state.clone()),
            json_request(
                "PATCH",
                "/api/recipes/user/sunton_2432s028r_320x240",
                &json!({"label": "Mine now"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap_or_default().contains("read-only"));

        let (status, _) = send(
            router(state.clone()),
            json_request("PATCH", "/api/recipes/user/sunton_2432s028r_320x240", &json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            router(state),
            empty_request("DELETE", "/api/recipes/user/sunton_2432s028r_320x240"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_recipe_then_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let yaml = "esp32:\n  board: esp32dev\nwifi:\n  ssid: home\ndisplay:\n  - platform: ili9xxx\n";

        let (status, body) = send(
            router(state.clone()),
            json_request("POST", "/api/recipes/import", &json!({"yaml": yaml, "label": "Bench"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipe"]["id"], "bench");
        assert_eq!(body["recipe"]["label"], "Bench");

        let (_, body) = send(router(state.clone()), empty_request("GET", "/api/recipes")).await;
        let listed = body["recipes"]
            .as_array()
            .expect("recipes")
            .iter()
            .find(|r| r["id"] == "bench")
            .cloned()
            .expect("imported recipe listed");
        assert_eq!(listed["source"], "user");
        assert_eq!(listed["label"], "Bench");

        let (status, body) = send(
            router(state),
            json_request("POST", "/api/recipes/import", &json!({"yaml": "- not\n- a mapping\n"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_project_backup_restores_onto_another_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let project = json!({
            "model_version": 2,
            "pages": [{"page_id": "main", "widgets": [
                {"id": "t", "type": "label", "props": {"text": "Hi"}}
            ]}]
        });
        for (id, body) in [
            ("hall", json!({"device_id": "hall", "hardware_recipe_id": "sunton_2432s028r_320x240", "project": project})),
            ("den", json!({"device_id": "den"})),
        ] {
            let (status, _) = send(router(state.clone()), json_request("POST", "/api/devices", &body)).await;
            assert_eq!(status, StatusCode::OK, "{id}");
        }

        let (status, body) = send(
            router(state.clone()),
            empty_request("GET", "/api/devices/hall/project/export"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let backup = body["export"].clone();
        assert_eq!(backup["device_id"], "hall");
        assert_eq!(backup["hardware_recipe_id"], "sunton_2432s028r_320x240");

        let (status, body) = send(
            router(state.clone()),
            json_request("POST", "/api/devices/den/project/import", &json!({"export": backup})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"]["hardware_recipe_id"], "sunton_2432s028r_320x240");
        assert_eq!(state.devices.project("den").expect("project"), project);

        let (status, body) = send(
            router(state),
            json_request("POST", "/api/devices/ghost/project/import", &json!({"export": {"project": {}}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "device_not_found");
    }

    #[tokio::test]
    async fn test_project_import_versions_and_clears_recipe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let (status, _) = send(
            router(state.clone()),
            json_request(
                "POST",
                "/api/devices",
                &json!({"device_id": "den", "hardware_recipe_id": "sunton_2432s028r_320x240"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let backup = json!({"export": {"project": {"pages": []}, "hardware_recipe_id": ""}});
        let (status, body) = send(
            router(state.clone()),
            json_request("POST", "/api/devices/den/project/import", &backup),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["device"]["hardware_recipe_id"].is_null());
        let stored = state.devices.project("den").expect("project");
        assert_eq!(stored["model_version"], 1);

        let (status, _) = send(
            router(state),
            json_request("POST", "/api/devices/den/project/import", &json!({"export": {"project": []}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
