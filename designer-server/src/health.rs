//! Health check endpoints.
//!
//! - `/health/live` - Liveness probe (restart if fails)
//! - `/health/ready` - Readiness probe (stop routing traffic if fails)

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: &'static str,
    /// Server version
    pub version: &'static str,
    /// Individual component checks
    pub checks: HealthChecks,
}

/// Individual health checks.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// At least one widget schema is registered.
    pub schema_registry: bool,
    /// The deploy directory exists.
    pub deploy_dir: bool,
    /// The asset directory exists.
    pub asset_store: bool,
    /// A capability resolver is configured. Informational: compiles still
    /// run without one, with bindings deferred.
    pub resolver_configured: bool,
}

impl HealthChecks {
    fn all_ok(&self) -> bool {
        self.schema_registry && self.deploy_dir && self.asset_store
    }
}

/// Liveness probe - is the server running?
#[tracing::instrument(name = "liveness_probe")]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - can the server compile and deploy?
#[tracing::instrument(name = "readiness_probe", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let checks = HealthChecks {
        schema_registry: !state.registry.is_empty(),
        deploy_dir: state.deployer.deploy_dir().is_dir(),
        asset_store: state.assets.dir().is_dir(),
        resolver_configured: state.resolver_configured,
    };
    let all_ok = checks.all_ok();

    let status = HealthStatus {
        status: if all_ok { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        checks,
    };

    let code = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}
