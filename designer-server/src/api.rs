//! JSON envelope shared by every `/api` route.
//!
//! Success bodies are `{"ok": true, ...}`. Failures are
//! `{"ok": false, "error": <code>, "message": <text>}` with a status chosen
//! by [`ApiError::status`]. Internal faults are logged and reported without
//! details.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use designer_core::{
    AssetError, CompileIssue, DeployError, RecipeError, RegistryError, ResolveError, StoreError,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::metrics;
use crate::validation::ValidationError;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body or parameter.
    #[error("{0}")]
    BadRequest(String),
    /// Unknown device.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Unknown widget type.
    #[error("Widget schema not found: {0}")]
    SchemaNotFound(String),
    /// Unknown recipe.
    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),
    /// Unknown home-automation entity.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
    /// Stale `expected_hash` on deploy.
    #[error("Deploy conflict: artifact changed since it was previewed")]
    Conflict {
        /// Hash supplied by the caller.
        expected: String,
        /// Hash currently recorded.
        current: Option<String>,
    },
    /// The capability resolver is unreachable; retry later.
    #[error("Capability resolver unavailable: {message}")]
    ResolverUnavailable {
        /// Description of the failure.
        message: String,
        /// Deferred binding issues, when raised by a compile.
        issues: Vec<CompileIssue>,
    },
    /// Anything else. Details are logged, not returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable error code sent in the `error` field.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::SchemaNotFound(_) => "schema_not_found",
            Self::RecipeNotFound(_) => "recipe_not_found",
            Self::EntityNotFound(_) => "entity_not_found",
            Self::Conflict { .. } => "conflict",
            Self::ResolverUnavailable { .. } => "resolver_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_)
            | Self::SchemaNotFound(_)
            | Self::RecipeNotFound(_)
            | Self::EntityNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::ResolverUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "ok": false,
            "error": self.code(),
        });
        match self {
            Self::Internal(detail) => {
                tracing::error!("Internal error: {detail}");
                body["message"] = json!("internal error");
            }
            Self::Conflict { expected, current } => {
                body["message"] = json!(self.to_string());
                body["expected_hash"] = json!(expected);
                body["current_hash"] = json!(current);
            }
            Self::ResolverUnavailable { issues, .. } => {
                body["message"] = json!(self.to_string());
                if !issues.is_empty() {
                    body["issues"] = json!(issues);
                }
            }
            _ => body["message"] = json!(self.to_string()),
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        metrics::record_validation_failure(err.field());
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            StoreError::InvalidDeviceId(_) | StoreError::InvalidProject => {
                Self::BadRequest(err.to_string())
            }
            StoreError::Io(_) | StoreError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(widget_type) => Self::SchemaNotFound(widget_type),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RecipeError> for ApiError {
    fn from(err: RecipeError) -> Self {
        match err {
            RecipeError::NotFound(id) => Self::RecipeNotFound(id),
            RecipeError::ReadOnly(_) | RecipeError::InvalidYaml(_) => {
                Self::BadRequest(err.to_string())
            }
            RecipeError::NoUserDirectory | RecipeError::Metadata(_) | RecipeError::Io(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<AssetError> for ApiError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::InvalidName(_) | AssetError::TooLarge { .. } => {
                Self::BadRequest(err.to_string())
            }
            AssetError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Conflict { expected, current } => Self::Conflict { expected, current },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::EntityNotFound(id) => Self::EntityNotFound(id),
            ResolveError::Unavailable(message) => Self::ResolverUnavailable {
                message,
                issues: Vec::new(),
            },
        }
    }
}

/// Handler result type.
pub type ApiResult = Result<Json<Value>, ApiError>;

/// Wrap a payload in the success envelope.
///
/// Object payloads are merged into the envelope; anything else travels
/// under `data`.
pub fn ok(payload: Value) -> ApiResult {
    let mut body = Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    match payload {
        Value::Object(fields) => body.extend(fields),
        Value::Null => {}
        other => {
            body.insert("data".to_string(), other);
        }
    }
    Ok(Json(Value::Object(body)))
}
