// gemflows — Per-run step output store

use std::collections::HashMap;

/// Outputs of the steps that have completed in the current run, keyed by
/// step id. Each id is written once, by the scheduler, after its step
/// succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    values: HashMap<String, String>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    /// Record a step's output. Step ids are unique per workflow, so a second
    /// write for the same id is a scheduler bug.
    pub fn insert(&mut self, id: impl Into<String>, output: impl Into<String>) {
        let id = id.into();
        debug_assert!(!self.values.contains_key(&id), "step {} written twice", id);
        self.values.insert(id, output.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
