// gemflows — Workflow execution engine
//
// Walks a workflow's steps in declared order. Ungrouped steps run one at a
// time; a contiguous run of steps sharing a `parallel_group` tag runs
// concurrently and is committed to memory only if every member succeeds.

pub mod error;
pub mod executor;
pub mod memory;

pub use error::{EngineError, StepError};
pub use executor::{StepExecutor, StepOutcome};
pub use memory::Memory;

use crate::capability::{ClipboardSink, FileSink, InputSource};
use crate::provider::GenerationProvider;
use crate::telemetry::TelemetrySink;
use crate::templating::render_step;
use crate::workflow::{segments, validate_group, Step, Workflow};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Collaborators the engine drives. Only the generator and telemetry sink
/// are optional.
pub struct Dependencies {
    pub generator: Option<Arc<dyn GenerationProvider>>,
    pub input: Arc<dyn InputSource>,
    pub clipboard: Arc<dyn ClipboardSink>,
    pub files: Arc<dyn FileSink>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
}

pub struct Engine {
    executor: StepExecutor,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Engine {
    pub fn new(deps: Dependencies) -> Self {
        Self {
            executor: StepExecutor::new(deps.generator, deps.input, deps.clipboard, deps.files),
            telemetry: deps.telemetry,
        }
    }

    /// Run every step of `workflow` and return the outputs keyed by step id.
    ///
    /// The workflow is validated before anything executes. The first error
    /// aborts the run and the outputs collected so far are dropped.
    pub async fn run(&self, workflow: &Workflow) -> Result<Memory, EngineError> {
        workflow.validate()?;

        let span = tracing::info_span!(
            "run",
            workflow = %workflow.name,
            run_id = %uuid::Uuid::new_v4()
        );
        self.run_steps(workflow).instrument(span).await
    }

    async fn run_steps(&self, workflow: &Workflow) -> Result<Memory, EngineError> {
        tracing::info!(steps = workflow.steps.len(), "Workflow started");
        let mut memory = Memory::new();

        for (start, end) in segments(&workflow.steps) {
            let steps = &workflow.steps[start..end];
            if steps[0].group().is_some() {
                self.run_parallel_group(workflow, steps, &mut memory).await?;
            } else {
                self.run_sequential(workflow, &steps[0], &mut memory).await?;
            }
        }

        tracing::info!("Workflow completed");
        Ok(memory)
    }

    async fn run_sequential(
        &self,
        workflow: &Workflow,
        step: &Step,
        memory: &mut Memory,
    ) -> Result<(), EngineError> {
        let rendered = render_step(step, memory).map_err(|source| EngineError::Render {
            step_id: step.id.clone(),
            source,
        })?;

        let outcome = self
            .executor
            .execute(&rendered, &CancellationToken::new())
            .await
            .map_err(|source| EngineError::Step {
                step_id: step.id.clone(),
                source,
            })?;

        memory.insert(step.id.clone(), outcome.output);
        self.report(workflow, step, outcome.duration);
        Ok(())
    }

    async fn run_parallel_group(
        &self,
        workflow: &Workflow,
        steps: &[Step],
        memory: &mut Memory,
    ) -> Result<(), EngineError> {
        let group = steps[0].group().unwrap_or_default();
        validate_group(steps)?;

        // Every member sees the memory as it was before the group started.
        let mut rendered = Vec::with_capacity(steps.len());
        for step in steps {
            let r = render_step(step, memory).map_err(|source| EngineError::Render {
                step_id: step.id.clone(),
                source,
            })?;
            rendered.push(r);
        }

        tracing::info!(group = %group, steps = rendered.len(), "Parallel group started");

        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        for (index, step) in rendered.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = executor.execute(&step, &cancel).await;
                if result.is_err() {
                    cancel.cancel();
                }
                (index, result)
            });
        }

        // Drain every task, even after a failure, so nothing outlives the group.
        let mut slots: Vec<Option<Result<StepOutcome, StepError>>> =
            (0..rendered.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    tracing::error!(group = %group, error = %e, "Parallel step task aborted");
                    cancel.cancel();
                }
            }
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        let mut failures = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            // An empty slot means the task panicked before reporting.
            match slot.unwrap_or_else(|| Err(StepError::capability("step task panicked"))) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => failures.push((index, e)),
            }
        }

        if let Some((index, source)) = reported_failure(failures) {
            tracing::warn!(group = %group, step = %rendered[index].id, "Parallel group failed");
            return Err(EngineError::Step {
                step_id: rendered[index].id.clone(),
                source,
            });
        }

        for (step, outcome) in steps.iter().zip(&mut outcomes) {
            memory.insert(step.id.clone(), std::mem::take(&mut outcome.output));
        }
        for (step, outcome) in steps.iter().zip(&outcomes) {
            self.report(workflow, step, outcome.duration);
        }

        tracing::info!(group = %group, "Parallel group completed");
        Ok(())
    }

    fn report(&self, workflow: &Workflow, step: &Step, duration: Duration) {
        if let Some(sink) = &self.telemetry {
            sink.step_completed(
                &workflow.name,
                &step.id,
                step.kind.as_str(),
                duration.as_millis() as u64,
            );
        }
    }
}

/// Choose which failure a group reports. `failures` is in declared order.
/// Members that only stopped because a sibling cancelled them are skipped,
/// so the root cause wins; among root causes the lowest index wins.
fn reported_failure(mut failures: Vec<(usize, StepError)>) -> Option<(usize, StepError)> {
    if failures.is_empty() {
        return None;
    }
    let pick = failures
        .iter()
        .position(|(_, e)| !e.is_cancelled())
        .unwrap_or(0);
    Some(failures.swap_remove(pick))
}
