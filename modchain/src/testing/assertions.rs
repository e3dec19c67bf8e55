//! Test assertions for pipeline runs.

use crate::core::{RunStatus, StageStatus};
use crate::pipeline::{PipelineRun, StageResult};

/// Asserts that the run completed.
pub fn assert_run_completed(run: &PipelineRun) {
    assert!(
        run.is_success(),
        "Expected run '{}' to complete, got {:?} with error {:?}",
        run.run_id,
        run.status,
        run.error
    );
}

/// Asserts the run's status.
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run status {:?}, got {:?} (error: {:?})",
        expected, run.status, run.error
    );
}

/// Asserts a stage's status and returns its result.
pub fn assert_stage_status<'a>(
    run: &'a PipelineRun,
    stage_id: &str,
    expected: StageStatus,
) -> &'a StageResult {
    let Some(result) = run.stage(stage_id) else {
        panic!(
            "Stage '{stage_id}' has no result. Recorded: {:?}",
            run.stage_results
                .iter()
                .map(|r| r.stage_id.as_str())
                .collect::<Vec<_>>()
        );
    };
    assert_eq!(
        result.status, expected,
        "Expected stage '{stage_id}' to be {expected:?}, got {:?}",
        result.status
    );
    result
}

/// Asserts which module served a completed stage.
pub fn assert_served_by(run: &PipelineRun, stage_id: &str, module_id: &str) {
    let result = assert_stage_status(run, stage_id, StageStatus::Completed);
    assert_eq!(
        result.module_id.as_deref(),
        Some(module_id),
        "Expected stage '{stage_id}' to be served by '{module_id}'"
    );
}
