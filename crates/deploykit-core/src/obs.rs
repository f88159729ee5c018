//! Structured observability hooks for workflow stages.
//!
//! - `stage_span` for instrumenting async stages
//! - `StageSpan` RAII guard scoping log lines in synchronous code
//! - emission functions for stage start/finish and endpoint lifecycle

use tracing::{info, warn};

/// Span tagged with the stage name; attach with `Instrument::instrument`.
pub fn stage_span(stage: &str) -> tracing::Span {
    tracing::info_span!("deploykit.stage", stage = %stage)
}

/// RAII guard that enters a stage-scoped tracing span.
///
/// Not for use across `.await` points; instrument the future instead.
///
/// ```ignore
/// let _span = StageSpan::enter("archive");
/// // every event logged here carries stage = "archive"
/// ```
pub struct StageSpan {
    _span: tracing::span::EnteredSpan,
}

impl StageSpan {
    pub fn enter(stage: &str) -> Self {
        Self {
            _span: stage_span(stage).entered(),
        }
    }
}

/// Emit event: stage started.
pub fn emit_stage_started(run_id: &str, stage: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

/// Emit event: stage finished with duration and status.
pub fn emit_stage_finished(run_id: &str, stage: &str, duration_ms: u64, success: bool) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: endpoint is in service.
pub fn emit_endpoint_ready(run_id: &str, endpoint_name: &str, duration_ms: u64) {
    info!(
        event = "endpoint.ready",
        run_id = %run_id,
        endpoint = %endpoint_name,
        duration_ms = duration_ms,
    );
}

/// Emit event: a failed run left a billable endpoint running (warning level).
pub fn emit_endpoint_left_running(run_id: &str, endpoint_name: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "endpoint.left_running",
        run_id = %run_id,
        endpoint = %endpoint_name,
        error = %error,
        "endpoint still running; delete it with `deploykit teardown`"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_span_enters_and_drops() {
        let span = StageSpan::enter("fetch");
        emit_stage_started("run-1", "fetch");
        drop(span);
        emit_stage_finished("run-1", "fetch", 12, true);
    }

    #[test]
    fn test_emitters_do_not_panic() {
        emit_endpoint_ready("run-1", "llama-ep", 1_000);
        emit_endpoint_left_running("run-1", "llama-ep", &"predict failed");
    }
}
