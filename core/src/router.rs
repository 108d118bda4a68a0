//! Model-name routing across registered harnesses.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::harness::Harness;

/// Ordered harness registry plus optional user overrides. Built once at
/// startup and shared immutably, so lookups take no lock.
#[derive(Default, Clone)]
pub struct ModelRouter {
    harnesses: Vec<(String, Arc<dyn Harness>)>,
    /// Lowercased alias → expansion, applied before any harness table.
    aliases: HashMap<String, String>,
    /// `(harness name, prefixes)` in configuration order; first match wins.
    patterns: Vec<(String, Vec<String>)>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, harness: Arc<dyn Harness>) -> Self {
        self.harnesses.push((name.into(), harness));
        self
    }

    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<(String, Vec<String>)>) -> Self {
        self.patterns = patterns
            .into_iter()
            .map(|(name, prefixes)| {
                (
                    name,
                    prefixes.into_iter().map(|p| p.to_lowercase()).collect(),
                )
            })
            .collect();
        self
    }

    pub fn harnesses(&self) -> &[(String, Arc<dyn Harness>)] {
        &self.harnesses
    }

    /// User aliases first, then each harness's own table in registration
    /// order; the first expansion that differs from the input wins.
    pub fn expand_alias(&self, model: &str) -> String {
        let lowered = model.to_lowercase();
        if let Some(expansion) = self.aliases.get(&lowered) {
            return expansion.clone();
        }
        for (_, harness) in &self.harnesses {
            let expanded = harness.expand_alias(model);
            if expanded != model {
                return expanded.into_owned();
            }
        }
        model.to_string()
    }

    /// Select the harness for a model id: user pattern overrides, then
    /// harness self-selection, then the first registered harness as the
    /// implicit default.
    pub fn harness_for(&self, model: &str) -> Option<Arc<dyn Harness>> {
        let lowered = model.to_lowercase();
        for (name, prefixes) in &self.patterns {
            let hit = prefixes
                .iter()
                .any(|p| lowered == *p || lowered.starts_with(p.as_str()));
            if hit && let Some(harness) = self.by_name(name) {
                debug!(model, harness = name, "routed by user pattern");
                return Some(harness);
            }
        }
        for (name, harness) in &self.harnesses {
            if harness.matches_model(model) {
                debug!(model, harness = name.as_str(), "routed by harness match");
                return Some(harness.clone());
            }
        }
        self.harnesses.first().map(|(_, h)| h.clone())
    }

    fn by_name(&self, name: &str) -> Option<Arc<dyn Harness>> {
        self.harnesses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| h.clone())
    }
}
