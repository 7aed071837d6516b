// gemflows — Single-step dispatch

use super::error::StepError;
use crate::capability::{ClipboardSink, FileSink, InputSource};
use crate::provider::GenerationProvider;
use crate::workflow::{InputMode, Step, StepAction};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Output of a successful step and how long its dispatch took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub output: String,
    pub duration: Duration,
}

/// Runs one already-rendered step against the capability it needs.
///
/// Cheap to clone: every capability is shared behind an `Arc`, so parallel
/// group members each get their own handle.
#[derive(Clone)]
pub struct StepExecutor {
    generator: Option<Arc<dyn GenerationProvider>>,
    input: Arc<dyn InputSource>,
    clipboard: Arc<dyn ClipboardSink>,
    files: Arc<dyn FileSink>,
}

impl StepExecutor {
    pub fn new(
        generator: Option<Arc<dyn GenerationProvider>>,
        input: Arc<dyn InputSource>,
        clipboard: Arc<dyn ClipboardSink>,
        files: Arc<dyn FileSink>,
    ) -> Self {
        Self {
            generator,
            input,
            clipboard,
            files,
        }
    }

    /// Execute `step`. The cancellation token is advisory: it is checked
    /// before dispatch and raced against provider calls, but blocking reads
    /// and helper processes already in flight run to completion.
    pub async fn execute(
        &self,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        tracing::info!(step = %step.id, step_type = %step.kind, "Running step");
        let start = Instant::now();
        let result = self.dispatch(step, cancel).await;
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                tracing::info!(
                    step = %step.id,
                    duration_ms = %duration.as_millis(),
                    output_len = output.len(),
                    "Step completed"
                );
                Ok(StepOutcome { output, duration })
            }
            Err(e) => {
                tracing::warn!(step = %step.id, duration_ms = %duration.as_millis(), error = %e, "Step failed");
                Err(e)
            }
        }
    }

    async fn dispatch(&self, step: &Step, cancel: &CancellationToken) -> Result<String, StepError> {
        let action = step
            .action()
            .map_err(|tag| StepError::UnsupportedStepType(tag.to_string()))?;

        match action {
            StepAction::Input { prompt, mode } => {
                let text = match mode {
                    InputMode::Line => self.input.read_line(prompt).await?,
                    InputMode::Multiline => self.input.read_until_end(prompt).await?,
                    InputMode::Clipboard => self.input.read_clipboard_after_confirm(prompt).await?,
                };
                Ok(text)
            }
            StepAction::Generate {
                model,
                system_prompt,
                user_prompt,
            } => {
                let provider = self
                    .generator
                    .as_ref()
                    .ok_or_else(|| StepError::capability("generation provider is not configured"))?;
                if model.is_empty() {
                    return Err(StepError::capability("model is required"));
                }

                let text = tokio::select! {
                    _ = cancel.cancelled() => return Err(StepError::Cancelled),
                    result = provider.generate(model, system_prompt, user_prompt) => result?,
                };
                if text.is_empty() {
                    return Err(StepError::capability("no text in response"));
                }
                Ok(text)
            }
            StepAction::Save { filename, content } => {
                if filename.is_empty() {
                    return Err(StepError::capability("filename is required"));
                }
                self.files.write(Path::new(filename), content.as_bytes()).await?;
                Ok(filename.to_string())
            }
            StepAction::Clipboard { content } => {
                if content.is_empty() {
                    return Err(StepError::capability("content is required"));
                }
                self.clipboard.write(content).await?;
                Ok("copied".to_string())
            }
        }
    }
}
