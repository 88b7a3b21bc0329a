use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use shopdesk_core::config::ExecutorConfig;
use shopdesk_core::errors::{ErrorKind, PlanError, ToolError};
use shopdesk_core::plan::{Plan, PlanStatus, StepStatus};
use shopdesk_core::tools::{Arguments, ResultShape, ToolInvoker, ToolRegistry};

use crate::session::SessionContext;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 100, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Result of one step's calls.
enum StepOutcome {
    Done(Value),
    /// `partial` holds the item results that did succeed for a repeated step.
    Failed { kind: ErrorKind, message: String, partial: Option<Value> },
}

/// Shared flag checked between waves. Steps already dispatched run to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both handles control the same execution.
    pub fn same_as(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

pub struct StepExecutor {
    invoker: Arc<dyn ToolInvoker>,
    registry: Arc<ToolRegistry>,
    retry: RetryPolicy,
    max_parallel: usize,
}

impl StepExecutor {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        registry: Arc<ToolRegistry>,
        retry: RetryPolicy,
        max_parallel: usize,
    ) -> Self {
        Self { invoker, registry, retry, max_parallel: max_parallel.max(1) }
    }

    pub fn from_config(
        invoker: Arc<dyn ToolInvoker>,
        registry: Arc<ToolRegistry>,
        config: &ExecutorConfig,
    ) -> Self {
        Self::new(invoker, registry, RetryPolicy::from_config(config), config.max_parallel_steps)
    }

    /// Runs a confirmed plan to a terminal status.
    ///
    /// Each wave starts every pending step whose references have all succeeded, up to the
    /// parallelism bound. Results are applied in step order once the wave finishes, so the
    /// outcome does not depend on which call returned first.
    pub async fn execute(
        &self,
        plan: &mut Plan,
        context: &mut SessionContext,
        cancel: &CancelHandle,
    ) -> Result<PlanStatus, PlanError> {
        if plan.status != PlanStatus::Executing {
            return Err(PlanError::InvalidTransition { from: plan.status, to: PlanStatus::Executing });
        }
        info!(
            event_name = "agent.plan.executing",
            session_id = %context.id(),
            plan_id = %plan.id,
            steps = plan.steps.len(),
        );

        loop {
            if cancel.is_cancelled() {
                for step in plan.steps.iter_mut().filter(|step| step.status == StepStatus::Pending) {
                    step.skip("cancelled");
                }
                info!(event_name = "agent.plan.cancelled", plan_id = %plan.id);
                break;
            }

            let wave = self.prepare_wave(plan);
            if wave.is_empty() {
                break;
            }

            let calls = wave.iter().map(|(id, tool, calls)| async move {
                (*id, self.call_each(*id, tool, calls).await)
            });
            let outcomes = join_all(calls).await;

            for (id, (outcome, attempts)) in outcomes {
                self.apply_outcome(plan, context, id, outcome, attempts);
            }
        }

        // Steps still pending here had a prerequisite that never succeeded.
        for step in plan.steps.iter_mut().filter(|step| step.status == StepStatus::Pending) {
            step.skip("a step it depends on did not succeed");
        }

        let status = plan.settle()?;
        info!(
            event_name = "agent.plan.finished",
            plan_id = %plan.id,
            status = status.as_str(),
            succeeded = plan.count(StepStatus::Succeeded),
            failed = plan.count(StepStatus::Failed),
            skipped = plan.count(StepStatus::Skipped),
        );
        Ok(status)
    }

    /// Invokes a single resolved call outside any plan.
    pub async fn run_direct(
        &self,
        tool: &str,
        arguments: &Arguments,
        context: &mut SessionContext,
    ) -> Result<Value, ToolError> {
        self.registry.validate_call(tool, arguments)?;
        let (outcome, _) = self.call_with_retry(0, tool, arguments).await;
        let value = outcome?;
        self.remember(tool, &value, context);
        Ok(value)
    }

    /// Picks the ready steps, resolves their bindings, and marks them Running.
    ///
    /// A step repeating over a list result expands into one call per element.
    fn prepare_wave(&self, plan: &mut Plan) -> Vec<(u32, String, Vec<Arguments>)> {
        let results: BTreeMap<u32, Value> = plan
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Succeeded)
            .filter_map(|step| step.result.clone().map(|result| (step.id, result)))
            .collect();

        let ready: Vec<u32> = plan
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .filter(|step| step.dependencies().iter().all(|dep| results.contains_key(dep)))
            .map(|step| step.id)
            .take(self.max_parallel)
            .collect();

        let mut wave = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(step) = plan.step(id) else { continue };
            let tool = step.tool.clone();
            let items: Vec<Option<&Value>> = match step.fan_out_source() {
                Some(source) => match results.get(&source).and_then(Value::as_array) {
                    Some(elements) => elements.iter().map(Some).collect(),
                    None => Vec::new(),
                },
                None => vec![None],
            };

            let mut calls = Vec::with_capacity(items.len());
            let mut failure = None;
            for item in items {
                let mut arguments = Arguments::new();
                for (name, binding) in &step.bindings {
                    match binding.resolve_with(&results, item) {
                        Ok(value) => {
                            arguments.insert(name.clone(), value);
                        }
                        Err(missing) => {
                            failure =
                                Some((ErrorKind::UnresolvedBinding, format!("argument `{name}`: {missing}")));
                            break;
                        }
                    }
                }
                if failure.is_none() {
                    if let Err(error) = self.registry.validate_call(&tool, &arguments) {
                        failure = Some((error.kind(), error.message().to_string()));
                    }
                }
                if failure.is_some() {
                    break;
                }
                calls.push(arguments);
            }

            match failure {
                Some((kind, message)) => {
                    warn!(
                        event_name = "agent.plan.step_failed",
                        plan_id = %plan.id,
                        step_id = id,
                        tool = %tool,
                        error_code = kind.code(),
                        "{message}"
                    );
                    fail_with_dependents(plan, id, kind, message);
                }
                None => {
                    if let Some(step) = plan.step_mut(id) {
                        step.status = StepStatus::Running;
                    }
                    wave.push((id, tool, calls));
                }
            }
        }
        wave
    }

    /// Runs a step's calls in order. A plain step has exactly one; a repeated step
    /// succeeds with the list of item results only when every item succeeds.
    async fn call_each(&self, step_id: u32, tool: &str, calls: &[Arguments]) -> (StepOutcome, u32) {
        let repeated = calls.len() != 1;
        let mut values = Vec::with_capacity(calls.len());
        let mut first_error = None;
        let mut failed = 0;
        let mut attempts = 0;
        for arguments in calls {
            let (outcome, tries) = self.call_with_retry(step_id, tool, arguments).await;
            attempts = attempts.max(tries);
            match outcome {
                Ok(value) => values.push(value),
                Err(error) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        let outcome = match first_error {
            None if repeated => StepOutcome::Done(Value::Array(values)),
            None => StepOutcome::Done(values.pop().unwrap_or(Value::Null)),
            Some(error) if repeated => StepOutcome::Failed {
                kind: error.kind(),
                message: format!("{failed} of {} item(s) failed; first: {}", calls.len(), error.message()),
                partial: Some(Value::Array(values)),
            },
            Some(error) => StepOutcome::Failed {
                kind: error.kind(),
                message: error.message().to_string(),
                partial: None,
            },
        };
        (outcome, attempts)
    }

    fn apply_outcome(
        &self,
        plan: &mut Plan,
        context: &mut SessionContext,
        id: u32,
        outcome: StepOutcome,
        attempts: u32,
    ) {
        let Some(step) = plan.step_mut(id) else { return };
        step.attempts = attempts;
        let tool = step.tool.clone();
        let repeated = step.fan_out_source().is_some();
        match outcome {
            StepOutcome::Done(value) => {
                debug!(event_name = "agent.plan.step_succeeded", plan_id = %plan.id, step_id = id, tool = %tool);
                if !repeated {
                    self.remember(&tool, &value, context);
                }
                if let Some(step) = plan.step_mut(id) {
                    step.succeed(value);
                }
            }
            StepOutcome::Failed { kind, message, partial } => {
                warn!(
                    event_name = "agent.plan.step_failed",
                    plan_id = %plan.id,
                    step_id = id,
                    tool = %tool,
                    error_code = kind.code(),
                    attempts,
                    "{message}"
                );
                fail_with_dependents(plan, id, kind, message);
                if let Some(step) = plan.step_mut(id) {
                    step.result = partial;
                }
            }
        }
    }

    /// Returns the final outcome and how many attempts it took. Only transient errors are retried.
    async fn call_with_retry(
        &self,
        step_id: u32,
        tool: &str,
        arguments: &Arguments,
    ) -> (Result<Value, ToolError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.invoker.invoke(tool, arguments).await {
                Ok(value) => return (Ok(value), attempt),
                Err(error) if error.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt - 1);
                    warn!(
                        event_name = "agent.tool.retrying",
                        step_id,
                        tool,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{}",
                        error.message()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return (Err(error), attempt),
            }
        }
    }

    fn remember(&self, tool: &str, value: &Value, context: &mut SessionContext) {
        let Some(spec) = self.registry.get(tool) else { return };
        let (Some(kind), Some(field)) = (spec.entity, spec.result.id_field.as_deref()) else {
            return;
        };
        if spec.result.shape != ResultShape::Single {
            return;
        }
        if let Some(id) = value.get(field).and_then(Value::as_str) {
            context.remember_entity(kind, id);
        }
    }
}

fn fail_with_dependents(plan: &mut Plan, id: u32, kind: ErrorKind, message: String) {
    if let Some(step) = plan.step_mut(id) {
        step.fail(kind, message);
    }
    for dependent in plan.dependents_of(id) {
        if let Some(step) = plan.step_mut(dependent) {
            if step.status == StepStatus::Pending {
                step.skip(format!("step {id} did not succeed"));
            }
        }
    }
}
