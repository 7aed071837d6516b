// gemflows — Workflow model and validation

pub mod parser;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("steps is required")]
    NoSteps,
    #[error("steps[{0}].id is required")]
    MissingStepId(usize),
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("steps[{index}].type must be one of: input, generate, save, clipboard (got {found})")]
    UnknownStepType { index: usize, found: String },
    #[error("parallel_group {group:?} mixes step types ({expected} vs {found} for {step_id})")]
    MixedParallelGroup {
        group: String,
        step_id: String,
        expected: String,
        found: String,
    },
    #[error("parallel_group {group:?} only supports generate steps (got {found} for {step_id})")]
    UnsupportedParallelType {
        group: String,
        step_id: String,
        found: String,
    },
}

// ---------------------------------------------------------------------------
// Step kind
// ---------------------------------------------------------------------------

/// The `type` tag of a step.
///
/// Unknown tags are kept as [`StepKind::Unsupported`] instead of failing
/// deserialization, so the engine can report them with the step id attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Input,
    Generate,
    Save,
    Clipboard,
    Unsupported(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Input => "input",
            StepKind::Generate => "generate",
            StepKind::Save => "save",
            StepKind::Clipboard => "clipboard",
            StepKind::Unsupported(tag) => tag,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, StepKind::Unsupported(_))
    }
}

impl From<String> for StepKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "input" => StepKind::Input,
            // Older recipes name the generation step after the provider.
            "generate" | "gemini" => StepKind::Generate,
            "save" => StepKind::Save,
            "clipboard" => StepKind::Clipboard,
            _ => StepKind::Unsupported(tag),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub from_clipboard: bool,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
}

impl Step {
    /// A bare step of the given kind; the remaining fields are empty.
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt: String::new(),
            multiline: false,
            from_clipboard: false,
            user_prompt: String::new(),
            system_prompt: String::new(),
            model: String::new(),
            filename: String::new(),
            content: String::new(),
            parallel_group: None,
        }
    }

    /// The parallel group tag, with an empty tag treated as no group.
    pub fn group(&self) -> Option<&str> {
        self.parallel_group.as_deref().filter(|g| !g.is_empty())
    }
}

/// How an `input` step collects its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Line,
    Multiline,
    Clipboard,
}

/// A step projected onto the fields its kind actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction<'a> {
    Input {
        prompt: &'a str,
        mode: InputMode,
    },
    Generate {
        model: &'a str,
        system_prompt: &'a str,
        user_prompt: &'a str,
    },
    Save {
        filename: &'a str,
        content: &'a str,
    },
    Clipboard {
        content: &'a str,
    },
}

impl Step {
    /// Project the flat record onto its action. Returns the raw tag when the
    /// kind is not one the engine knows how to run.
    pub fn action(&self) -> Result<StepAction<'_>, &str> {
        match &self.kind {
            StepKind::Input => {
                let mode = if self.from_clipboard {
                    InputMode::Clipboard
                } else if self.multiline {
                    InputMode::Multiline
                } else {
                    InputMode::Line
                };
                Ok(StepAction::Input {
                    prompt: &self.prompt,
                    mode,
                })
            }
            StepKind::Generate => Ok(StepAction::Generate {
                model: &self.model,
                system_prompt: &self.system_prompt,
                user_prompt: &self.user_prompt,
            }),
            StepKind::Save => Ok(StepAction::Save {
                filename: &self.filename,
                content: &self.content,
            }),
            StepKind::Clipboard => Ok(StepAction::Clipboard {
                content: &self.content,
            }),
            StepKind::Unsupported(tag) => Err(tag),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Workflow {
    /// Check the structural rules every runnable workflow must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps);
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(ValidationError::MissingStepId(index));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ValidationError::DuplicateStepId(step.id.clone()));
            }
            if !step.kind.is_supported() {
                return Err(ValidationError::UnknownStepType {
                    index,
                    found: step.kind.to_string(),
                });
            }
        }

        for (start, end) in segments(&self.steps) {
            if end - start > 1 || self.steps[start].group().is_some() {
                validate_group(&self.steps[start..end])?;
            }
        }
        Ok(())
    }
}

/// Split the step list into half-open index ranges: each parallel group is
/// one range, each ungrouped step is a range of length one.
pub fn segments(steps: &[Step]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < steps.len() {
        let mut j = i + 1;
        if let Some(group) = steps[i].group() {
            while j < steps.len() && steps[j].group() == Some(group) {
                j += 1;
            }
        }
        out.push((i, j));
        i = j;
    }
    out
}

/// All members of a parallel group must be `generate` steps.
pub fn validate_group(steps: &[Step]) -> Result<(), ValidationError> {
    let Some(first) = steps.first() else {
        return Ok(());
    };
    let group = first.group().unwrap_or_default().to_string();

    for step in steps {
        if step.kind != first.kind {
            return Err(ValidationError::MixedParallelGroup {
                group,
                step_id: step.id.clone(),
                expected: first.kind.to_string(),
                found: step.kind.to_string(),
            });
        }
    }
    if first.kind != StepKind::Generate {
        return Err(ValidationError::UnsupportedParallelType {
            group,
            step_id: first.id.clone(),
            found: first.kind.to_string(),
        });
    }
    Ok(())
}
