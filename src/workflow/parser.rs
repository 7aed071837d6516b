// gemflows — Workflow loading (YAML recipes on disk)

use crate::workflow::Workflow;
use anyhow::Context;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Parse and validate a workflow from YAML text.
pub fn parse_workflow(content: &str) -> anyhow::Result<Workflow> {
    let workflow: Workflow = serde_yaml::from_str(content).context("parse yaml")?;
    workflow.validate().context("invalid workflow")?;
    Ok(workflow)
}

/// Read, parse and validate a workflow file.
pub fn load_from_file(path: &Path) -> anyhow::Result<Workflow> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_workflow(&content).with_context(|| format!("load {}", path.display()))
}

/// Resolve `key` inside a workflows directory. A key without an extension is
/// tried as `<key>.yaml` and then `<key>.yml`.
pub fn load_from_dir(dir: &Path, key: &str) -> anyhow::Result<Workflow> {
    let candidates: Vec<PathBuf> = if Path::new(key).extension().is_none() {
        vec![
            dir.join(format!("{}.yaml", key)),
            dir.join(format!("{}.yml", key)),
        ]
    } else {
        vec![dir.join(key)]
    };

    let mut last_err = None;
    for path in candidates {
        match load_from_file(&path) {
            Ok(wf) => return Ok(wf),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Workflow candidate rejected");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no workflow candidates")))
}

/// Workflow keys (file names without extension) found in a directory.
/// A missing directory has no keys.
pub fn list_keys(dir: &Path) -> anyhow::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read dir {}", dir.display())),
    };

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(base) = strip_yaml_ext(&name) else {
            continue;
        };
        if base.is_empty() || !seen.insert(base.to_string()) {
            continue;
        }
        keys.push(base.to_string());
    }
    keys.sort();
    Ok(keys)
}

/// Strip a `.yaml` / `.yml` extension (case-insensitive). Returns `None` for
/// names that are not YAML files.
pub fn strip_yaml_ext(name: &str) -> Option<&str> {
    [".yaml", ".yml"].iter().find_map(|ext| {
        let split = name.len().checked_sub(ext.len())?;
        let tail = name.get(split..)?;
        tail.eq_ignore_ascii_case(ext).then(|| &name[..split])
    })
}
