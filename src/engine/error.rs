// gemflows — Engine error taxonomy

use crate::templating::MissingVariables;
use crate::workflow::ValidationError;
use thiserror::Error;

/// Why a single step failed.
#[derive(Error, Debug)]
pub enum StepError {
    /// The underlying action failed: no provider, an empty required field,
    /// or a provider/network/OS error.
    #[error(transparent)]
    Capability(#[from] anyhow::Error),
    #[error("unsupported step type: {0}")]
    UnsupportedStepType(String),
    /// A sibling in the same parallel group failed first.
    #[error("cancelled after a sibling step failed")]
    Cancelled,
}

impl StepError {
    pub fn capability(msg: impl std::fmt::Display) -> Self {
        StepError::Capability(anyhow::anyhow!("{}", msg))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

/// Error returned from a workflow run. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),
    #[error("render step {step_id}: {source}")]
    Render {
        step_id: String,
        #[source]
        source: MissingVariables,
    },
    #[error("step {step_id} failed: {source}")]
    Step {
        step_id: String,
        #[source]
        source: StepError,
    },
}

impl EngineError {
    /// The step the failure is attributed to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            EngineError::Validation(_) => None,
            EngineError::Render { step_id, .. } | EngineError::Step { step_id, .. } => {
                Some(step_id.as_str())
            }
        }
    }
}
