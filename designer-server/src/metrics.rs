//! Prometheus metrics for the designer server.
//!
//! Provides metrics collection and a Prometheus-compatible `/metrics` endpoint.

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// Metric names as constants for consistency
const COMPILES_TOTAL: &str = "designer_compiles_total";
const COMPILE_DURATION: &str = "designer_compile_duration_seconds";
const COMPILE_ISSUES_TOTAL: &str = "designer_compile_issues_total";
const DEPLOYS_TOTAL: &str = "designer_deploys_total";
const RESOLVER_CALLS_TOTAL: &str = "designer_resolver_calls_total";
const RESOLVER_RETRY_ATTEMPTS: &str = "designer_resolver_retry_attempts_total";
const VALIDATION_FAILURES_TOTAL: &str = "designer_validation_failures_total";
const ASSET_UPLOADS_TOTAL: &str = "designer_asset_uploads_total";
const RECIPE_CHANGES_TOTAL: &str = "designer_recipe_changes_total";

/// Initialize metrics and return the Prometheus handle.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder cannot be installed
/// (e.g., if another recorder is already installed).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a finished compile.
///
/// # Arguments
///
/// * `mode` - "export" or "preview"
/// * `outcome` - "ok", "failed" or "deferred"
/// * `elapsed` - Wall time spent compiling
pub fn record_compile(mode: &str, outcome: &str, elapsed: Duration) {
    counter!(
        COMPILES_TOTAL,
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(COMPILE_DURATION, "mode" => mode.to_string()).record(elapsed.as_secs_f64());
}

/// Record one compile issue by kind (`missing_recipe`, `invalid_binding`, ...).
pub fn record_compile_issue(kind: &str) {
    counter!(COMPILE_ISSUES_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a deploy attempt.
///
/// # Arguments
///
/// * `outcome` - "written", "unchanged", "conflict" or "error"
pub fn record_deploy(outcome: &str) {
    counter!(DEPLOYS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record a capability lookup.
///
/// # Arguments
///
/// * `outcome` - "ok", "not_found" or "unavailable"
pub fn record_resolver_call(outcome: &str) {
    counter!(RESOLVER_CALLS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record a resolver retry attempt.
///
/// # Arguments
///
/// * `outcome` - "success" or "failure"
pub fn record_resolver_retry(outcome: &str) {
    counter!(
        RESOLVER_RETRY_ATTEMPTS,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an input validation failure.
///
/// # Arguments
///
/// * `validation_type` - Field that failed (device_id, entity_id, widget_type, ...)
pub fn record_validation_failure(validation_type: &str) {
    counter!(
        VALIDATION_FAILURES_TOTAL,
        "type" => validation_type.to_string()
    )
    .increment(1);
}

/// Record an asset upload.
pub fn record_asset_upload(success: bool) {
    counter!(ASSET_UPLOADS_TOTAL, "success" => success.to_string()).increment(1);
}

/// Record a change to the user recipe directory.
///
/// # Arguments
///
/// * `action` - "import", "clone", "update" or "delete"
/// * `success` - Whether the change was stored
pub fn record_recipe_change(action: &str, success: bool) {
    counter!(
        RECIPE_CHANGES_TOTAL,
        "action" => action.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // No recorder is installed in unit tests; every call must be inert.
        record_compile("export", "ok", Duration::from_millis(3));
        record_compile_issue("missing_recipe");
        record_deploy("written");
        record_resolver_call("unavailable");
        record_resolver_retry("failure");
        record_validation_failure("device_id");
        record_asset_upload(true);
        record_recipe_change("clone", false);
    }
}
