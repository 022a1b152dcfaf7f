//! Explicit parser registry built once per run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::{CppParser, Parser};

/// Ordered set of parsers; the first one accepting a path wins.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
    disabled: HashSet<String>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CppParser::new()));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        tracing::debug!("Registered parser '{}'", parser.name());
        self.parsers.push(parser);
    }

    /// Exclude a parser by name from resolution.
    pub fn disable(&mut self, name: &str) {
        if !self.parsers.iter().any(|p| p.name() == name) {
            tracing::warn!("Cannot disable unknown parser '{}'", name);
        }
        self.disabled.insert(name.to_string());
    }

    /// The first enabled parser accepting `path`.
    pub fn resolve(&self, path: &Path) -> Option<&Arc<dyn Parser>> {
        self.enabled().find(|parser| parser.accept(path))
    }

    /// Enabled parsers in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Parser>> {
        self.parsers
            .iter()
            .filter(|parser| !self.disabled.contains(parser.name()))
    }

    pub fn len(&self) -> usize {
        self.enabled().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
