// Processor Registry - workflow name -> Processor

use crate::error::{AppError, Result};
use crate::port::Processor;
use std::collections::HashMap;
use std::sync::Arc;

/// Explicitly constructed routing table; built once at startup and shared read-only
///
/// Patterns: an exact workflow name, a prefix ending in `*` (`comfyui_*`), or
/// `*` for the default processor. Resolution prefers exact, then the longest
/// matching prefix, then the default.
#[derive(Default)]
pub struct ProcessorRegistry {
    exact: HashMap<String, Arc<dyn Processor>>,
    prefixes: Vec<(String, Arc<dyn Processor>)>,
    default: Option<Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the processor for a pattern
    pub fn register(&mut self, pattern: &str, processor: Arc<dyn Processor>) -> Result<()> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(AppError::Config(
                "processor pattern must not be empty".to_string(),
            ));
        }

        if pattern == "*" {
            self.default = Some(processor);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            if prefix.contains('*') {
                return Err(AppError::Config(format!(
                    "only a single trailing '*' is supported: {}",
                    pattern
                )));
            }
            self.prefixes.retain(|(p, _)| p != prefix);
            self.prefixes.push((prefix.to_string(), processor));
            // Longest prefix first
            self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        } else if pattern.contains('*') {
            return Err(AppError::Config(format!(
                "'*' is only allowed at the end of a pattern: {}",
                pattern
            )));
        } else {
            self.exact.insert(pattern.to_string(), processor);
        }
        Ok(())
    }

    pub fn resolve(&self, workflow: &str) -> Option<Arc<dyn Processor>> {
        if let Some(p) = self.exact.get(workflow) {
            return Some(Arc::clone(p));
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| workflow.starts_with(prefix.as_str()))
            .map(|(_, p)| Arc::clone(p))
            .or_else(|| self.default.clone())
    }

    /// Registered patterns with the processor name, sorted
    pub fn patterns(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .exact
            .iter()
            .map(|(k, p)| (k.clone(), p.name().to_string()))
            .chain(
                self.prefixes
                    .iter()
                    .map(|(k, p)| (format!("{}*", k), p.name().to_string())),
            )
            .chain(self.default.iter().map(|p| ("*".to_string(), p.name().to_string())))
            .collect();
        out.sort();
        out
    }
}
