// gemflows — `{{ variable }}` substitution

use crate::engine::memory::Memory;
use crate::workflow::Step;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

/// Raised when a template references variables that are not in memory.
/// Identifiers are distinct and listed in the order they were first seen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("missing variables: {}", .0.join(", "))]
pub struct MissingVariables(pub Vec<String>);

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-zA-Z0-9_\-]+)\s*\}\}").expect("token pattern is valid")
    })
}

/// Replace every `{{ id }}` token with `memory[id]`.
pub fn render(template: &str, memory: &Memory) -> Result<String, MissingVariables> {
    if template.is_empty() {
        return Ok(String::new());
    }

    let mut missing: Vec<String> = Vec::new();
    let out = token_re().replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match memory.get(key) {
            Some(value) => value.to_string(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        return Ok(out.into_owned());
    }

    let mut seen = HashSet::new();
    missing.retain(|key| seen.insert(key.clone()));
    Err(MissingVariables(missing))
}

/// Render a step's templated fields, stopping at the first one that fails.
///
/// Fields are rendered in a fixed order: prompt, user_prompt, system_prompt,
/// model, filename, content.
pub fn render_step(step: &Step, memory: &Memory) -> Result<Step, MissingVariables> {
    let mut rendered = step.clone();
    rendered.prompt = render(&step.prompt, memory)?;
    rendered.user_prompt = render(&step.user_prompt, memory)?;
    rendered.system_prompt = render(&step.system_prompt, memory)?;
    rendered.model = render(&step.model, memory)?;
    rendered.filename = render(&step.filename, memory)?;
    rendered.content = render(&step.content, memory)?;
    Ok(rendered)
}
