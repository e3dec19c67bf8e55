//! Pipeline execution with fallback, caching and rollback.

use super::{PipelineDefinition, PipelineRun, StageResult, StageSpec, TransformerRegistry};
use crate::cache::{CacheStore, Fingerprint};
use crate::cancellation::CancellationToken;
use crate::core::{AttemptRecord, DataKind, EngineEvent, FailureKind, RunStatus, StageStatus};
use crate::errors::{ExecutionError, ModchainError};
use crate::events::EventSink;
use crate::health::{AttemptDecision, CircuitBreaker};
use crate::observability::WideEventEmitter;
use crate::registry::{Module, SelectionSignals};
use crate::selector::FallbackSelector;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for pipeline execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for a single module call. `None` waits indefinitely.
    pub module_timeout_ms: Option<u64>,
    /// Log one wide event per finished run.
    pub wide_events: bool,
}

impl ExecutorConfig {
    /// Creates a new executor config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the module timeout.
    #[must_use]
    pub fn with_module_timeout(mut self, timeout: Duration) -> Self {
        self.module_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the module timeout.
    #[must_use]
    pub fn module_timeout(&self) -> Option<Duration> {
        self.module_timeout_ms.map(Duration::from_millis)
    }
}

/// A payload together with the kind it was declared as.
#[derive(Debug, Clone)]
struct Payload {
    value: Value,
    kind: DataKind,
}

/// Cache entries a run created, so a rollback can remove exactly those.
struct RunScope {
    run_id: String,
    owned: Mutex<Vec<Fingerprint>>,
}

impl RunScope {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            owned: Mutex::new(Vec::new()),
        }
    }

    fn own(&self, fingerprint: Fingerprint) {
        self.owned.lock().push(fingerprint);
    }

    fn take(&self) -> Vec<Fingerprint> {
        std::mem::take(&mut *self.owned.lock())
    }
}

/// Runs pipeline definitions.
pub struct PipelineExecutor {
    selector: Arc<FallbackSelector>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<dyn CacheStore>>,
    transformers: Arc<TransformerRegistry>,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl PipelineExecutor {
    /// Creates an executor without a cache and with the built-in
    /// transformers.
    #[must_use]
    pub fn new(
        selector: Arc<FallbackSelector>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            selector,
            breaker,
            cache: None,
            transformers: Arc::new(TransformerRegistry::with_builtins()),
            sink,
            config: ExecutorConfig::default(),
        }
    }

    /// Sets the stage output cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the transformers.
    #[must_use]
    pub fn with_transformers(mut self, transformers: Arc<TransformerRegistry>) -> Self {
        self.transformers = transformers;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a pipeline to completion.
    ///
    /// Never fails: every outcome, including validation errors and
    /// rollbacks, is reported on the returned run.
    pub async fn run(&self, definition: &PipelineDefinition, input: Value) -> PipelineRun {
        self.run_with_cancellation(definition, input, &CancellationToken::new())
            .await
    }

    /// Runs a pipeline that the caller can cancel through `cancel`.
    ///
    /// A cancelled run ends `Failed` with [`ModchainError::Cancelled`]; cache
    /// entries it already stored are kept.
    pub async fn run_with_cancellation(
        &self,
        definition: &PipelineDefinition,
        input: Value,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let run = PipelineRun::new(&definition.name);
        info!(
            run_id = %run.run_id,
            pipeline = %definition.name,
            stages = definition.stages.len(),
            "Starting pipeline run"
        );

        if let Err(err) = definition.validate() {
            warn!(run_id = %run.run_id, error = %err, "Rejecting invalid pipeline");
            return self.finish(run, RunStatus::Failed, None, Some(err.into()));
        }

        self.run_groups(run, definition, input, cancel).await
    }

    async fn run_groups(
        &self,
        mut run: PipelineRun,
        definition: &PipelineDefinition,
        input: Value,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let scope = RunScope::new(&run.run_id);
        let mut current = Payload {
            value: input,
            kind: definition.input_kind,
        };

        for group in definition.groups() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(run, cancel);
            }

            let group_token = cancel.child();
            let results = self.run_group(group, &current, &scope, &group_token).await;

            let failed = results
                .iter()
                .find(|r| r.status == StageStatus::Failed)
                .map(|r| (r.stage_id.clone(), r.attempts.clone()));
            let next = next_payload(group, &results, &current);
            for result in results {
                run.record_stage(result);
            }

            if cancel.is_cancelled() {
                return self.finish_cancelled(run, cancel);
            }
            if let Some((stage_id, attempts)) = failed {
                return self.rollback(run, &scope, stage_id, attempts).await;
            }
            current = next;
        }

        self.finish(run, RunStatus::Completed, Some(current.value), None)
    }

    /// Runs the stages of one group concurrently on the current task and
    /// returns their results in group order.
    async fn run_group(
        &self,
        group: &[StageSpec],
        input: &Payload,
        scope: &RunScope,
        token: &CancellationToken,
    ) -> Vec<StageResult> {
        let mut pending: FuturesUnordered<_> = group
            .iter()
            .enumerate()
            .map(|(index, stage)| async move {
                (index, self.run_stage(stage, input, scope, token).await)
            })
            .collect();

        let mut slots: Vec<Option<StageResult>> = vec![None; group.len()];
        while let Some((index, result)) = pending.next().await {
            if result.status == StageStatus::Failed && !token.is_cancelled() {
                debug!(stage_id = %result.stage_id, "Required stage failed, cancelling siblings");
                token.cancel(format!("stage '{}' failed", result.stage_id));
            }
            slots[index] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }

    async fn run_stage(
        &self,
        stage: &StageSpec,
        input: &Payload,
        scope: &RunScope,
        token: &CancellationToken,
    ) -> StageResult {
        let started = Instant::now();
        let result = self
            .resolve_stage(stage, input, scope, token)
            .await
            .with_duration_ms(elapsed_ms(started));

        match result.status {
            StageStatus::Completed => {
                let module_id = result.module_id.clone().unwrap_or_default();
                debug!(
                    run_id = %scope.run_id,
                    stage_id = %stage.id,
                    module_id = %module_id,
                    cache_hit = result.cache_hit,
                    duration_ms = result.duration_ms,
                    "Stage completed"
                );
                self.sink.try_emit(EngineEvent::StageCompleted {
                    run_id: scope.run_id.clone(),
                    stage_id: stage.id.clone(),
                    cache_hit: result.cache_hit,
                    module_id,
                });
            }
            StageStatus::Skipped => {
                info!(
                    run_id = %scope.run_id,
                    stage_id = %stage.id,
                    attempts = result.attempts.len(),
                    "Optional stage skipped"
                );
            }
            StageStatus::Failed => {
                warn!(
                    run_id = %scope.run_id,
                    stage_id = %stage.id,
                    attempts = result.attempts.len(),
                    "Required stage failed"
                );
            }
            StageStatus::Cancelled => {
                debug!(run_id = %scope.run_id, stage_id = %stage.id, "Stage cancelled");
            }
        }

        result
    }

    async fn resolve_stage(
        &self,
        stage: &StageSpec,
        input: &Payload,
        scope: &RunScope,
        token: &CancellationToken,
    ) -> StageResult {
        let adapted = match self
            .transformers
            .adapt(&input.value, input.kind, stage.input_kind)
        {
            Ok(value) => value,
            Err(err) => {
                let cause = ModchainError::TransformFailed {
                    stage_id: stage.id.clone(),
                    from: input.kind,
                    to: stage.input_kind,
                    reason: err.to_string(),
                };
                let attempts = vec![AttemptRecord::new("", FailureKind::Transform, err.to_string())];
                return exhausted(stage, cause, attempts);
            }
        };
        let signals = SelectionSignals::from_hints(&stage.hints).with_payload(&adapted);

        if let Some(hit) = self.probe_cache(stage, &adapted, &signals, token).await {
            return hit;
        }
        if token.is_cancelled() {
            return cancelled(stage, token, Vec::new());
        }

        let max_attempts = self.selector.config().max_attempts.max(1);
        let mut excluded = HashSet::new();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut next = self
            .selector
            .select_candidate_with(&stage.category, &excluded, &signals);

        loop {
            let module_id = match next {
                Ok(module_id) => module_id,
                Err(err) => return exhausted(stage, err, attempts),
            };
            if attempts.len() >= max_attempts {
                let cause = ModchainError::unavailable(
                    &stage.category,
                    format!("gave up after {max_attempts} attempts"),
                );
                return exhausted(stage, cause, attempts);
            }

            let trial = match self.breaker.allow_attempt(&module_id) {
                AttemptDecision::Allowed { trial } => trial,
                AttemptDecision::Denied { retry_after } => {
                    attempts.push(AttemptRecord::new(
                        &module_id,
                        FailureKind::Unavailable,
                        format!("circuit open, retry after {}ms", retry_after.as_millis()),
                    ));
                    excluded.insert(module_id);
                    next = self
                        .selector
                        .select_candidate_with(&stage.category, &excluded, &signals);
                    continue;
                }
            };

            let Some(module) = self.selector.registry().executor(&module_id) else {
                let reason = "no executor registered";
                attempts.push(AttemptRecord::new(&module_id, FailureKind::Unavailable, reason));
                next = self.selector.record_failure_and_advance_with(
                    &module_id,
                    &stage.category,
                    &mut excluded,
                    0.0,
                    reason,
                    trial,
                    &signals,
                );
                continue;
            };

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = self.execute_module(module.as_ref(), adapted.clone()) => Some(result),
            };
            let latency_ms = elapsed_ms(attempt_started);

            match outcome {
                None => {
                    if trial {
                        self.breaker.release_trial(&module_id);
                    }
                    attempts.push(AttemptRecord::new(
                        &module_id,
                        FailureKind::Cancelled,
                        cancel_reason(token),
                    ));
                    return cancelled(stage, token, attempts);
                }
                Some(Ok(output)) => {
                    self.selector.record_success(&module_id, latency_ms, trial);
                    if token.is_cancelled() {
                        // Finished after a sibling failed: the output is discarded.
                        return cancelled(stage, token, attempts);
                    }
                    self.store(stage, &adapted, &module_id, &output, scope).await;
                    return StageResult::completed(&stage.id, &module_id, output, false)
                        .with_attempts(attempts);
                }
                Some(Err(err)) => {
                    let kind = if err.timed_out {
                        FailureKind::Timeout
                    } else {
                        FailureKind::Execution
                    };
                    debug!(
                        stage_id = %stage.id,
                        module_id = %module_id,
                        latency_ms,
                        error = %err,
                        "Module attempt failed"
                    );
                    attempts.push(AttemptRecord::new(&module_id, kind, &err.message));
                    next = self.selector.record_failure_and_advance_with(
                        &module_id,
                        &stage.category,
                        &mut excluded,
                        latency_ms,
                        &err.message,
                        trial,
                        &signals,
                    );
                }
            }
        }
    }

    async fn execute_module(&self, module: &dyn Module, input: Value) -> Result<Value, ExecutionError> {
        let call = AssertUnwindSafe(module.execute(input)).catch_unwind();
        let outcome = match self.config.module_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(ExecutionError::timeout(limit)),
            },
            None => call.await,
        };

        outcome.unwrap_or_else(|_| {
            Err(ExecutionError::new(format!(
                "module '{}' panicked",
                module.id()
            )))
        })
    }

    /// Looks for a cached output of any eligible candidate, best first.
    async fn probe_cache(
        &self,
        stage: &StageSpec,
        input: &Value,
        signals: &SelectionSignals,
        token: &CancellationToken,
    ) -> Option<StageResult> {
        let cache = self.cache.as_ref()?;
        let decision = self.selector.rank(&stage.category, &HashSet::new(), signals);

        for candidate in &decision.candidates {
            if token.is_cancelled() {
                return None;
            }
            let fingerprint = Fingerprint::compute(&stage.id, input, &candidate.module_id);
            if let Some(entry) = cache.get(&fingerprint).await.entry() {
                debug!(
                    stage_id = %stage.id,
                    module_id = %candidate.module_id,
                    key = %fingerprint,
                    "Cache hit"
                );
                return Some(StageResult::completed(
                    &stage.id,
                    &candidate.module_id,
                    entry.value.clone(),
                    true,
                ));
            }
        }

        None
    }

    async fn store(
        &self,
        stage: &StageSpec,
        input: &Value,
        module_id: &str,
        output: &Value,
        scope: &RunScope,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };
        let fingerprint = Fingerprint::compute(&stage.id, input, module_id);
        if cache.put(&fingerprint, output.clone(), &scope.run_id).await {
            scope.own(fingerprint);
        }
    }

    async fn rollback(
        &self,
        run: PipelineRun,
        scope: &RunScope,
        stage_id: String,
        attempts: Vec<AttemptRecord>,
    ) -> PipelineRun {
        let mut invalidated = 0_usize;
        if let Some(cache) = &self.cache {
            for fingerprint in scope.take() {
                if cache.invalidate_owned(&fingerprint, &scope.run_id).await {
                    invalidated += 1;
                }
            }
        }

        let error = ModchainError::PipelineRolledBack {
            run_id: run.run_id.clone(),
            stage_id,
            attempts,
        };
        warn!(
            run_id = %run.run_id,
            invalidated,
            error = %error,
            "Rolling back pipeline run"
        );
        self.sink.try_emit(EngineEvent::RolledBack {
            run_id: run.run_id.clone(),
            reason: error.to_string(),
        });

        self.finish(run, RunStatus::RolledBack, None, Some(error))
    }

    fn finish_cancelled(&self, run: PipelineRun, cancel: &CancellationToken) -> PipelineRun {
        let reason = cancel_reason(cancel);
        info!(run_id = %run.run_id, reason = %reason, "Pipeline run cancelled");
        self.finish(
            run,
            RunStatus::Failed,
            None,
            Some(ModchainError::Cancelled { reason }),
        )
    }

    fn finish(
        &self,
        mut run: PipelineRun,
        status: RunStatus,
        output: Option<Value>,
        error: Option<ModchainError>,
    ) -> PipelineRun {
        run.finalize(status, output, error);
        info!(
            run_id = %run.run_id,
            status = ?run.status,
            duration_ms = run.duration_ms(),
            cache_hits = run.cache_hits(),
            "Pipeline run finished"
        );
        if self.config.wide_events {
            WideEventEmitter::new().emit(&run);
        }
        self.sink.try_emit(EngineEvent::RunFinished {
            run_id: run.run_id.clone(),
            status: run.status,
        });
        run
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("cache", &self.cache.is_some())
            .field("transformers", &self.transformers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Input for the group after `group`.
///
/// A single stage forwards its output; several stages forward an object
/// keyed by stage id. Stages without output are left out, and a group with
/// no output at all passes its own input through.
fn next_payload(group: &[StageSpec], results: &[StageResult], current: &Payload) -> Payload {
    let produced: Vec<(&StageSpec, &Value)> = group
        .iter()
        .zip(results)
        .filter(|(_, result)| result.status == StageStatus::Completed)
        .filter_map(|(stage, result)| result.output.as_ref().map(|output| (stage, output)))
        .collect();

    match produced.as_slice() {
        [] => current.clone(),
        [(stage, output)] if group.len() == 1 => Payload {
            value: (*output).clone(),
            kind: stage.output_kind,
        },
        _ => Payload {
            value: Value::Object(
                produced
                    .iter()
                    .map(|(stage, output)| (stage.id.clone(), (*output).clone()))
                    .collect(),
            ),
            kind: DataKind::Data,
        },
    }
}

fn exhausted(stage: &StageSpec, cause: ModchainError, attempts: Vec<AttemptRecord>) -> StageResult {
    let status = if stage.required {
        StageStatus::Failed
    } else {
        StageStatus::Skipped
    };
    StageResult::unfinished(&stage.id, status, cause).with_attempts(attempts)
}

fn cancelled(stage: &StageSpec, token: &CancellationToken, attempts: Vec<AttemptRecord>) -> StageResult {
    StageResult::unfinished(
        &stage.id,
        StageStatus::Cancelled,
        ModchainError::Cancelled {
            reason: cancel_reason(token),
        },
    )
    .with_attempts(attempts)
}

fn cancel_reason(token: &CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "cancelled".to_string())
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
