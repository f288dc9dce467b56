//! Registry of authentication sources, looked up by id

use super::AuthSource;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps source ids to sources.
///
/// Built once at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn AuthSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own id, replacing any previous one
    pub fn register(&mut self, source: Arc<dyn AuthSource>) {
        self.sources.insert(source.id().to_string(), source);
    }

    #[must_use]
    pub fn with(mut self, source: Arc<dyn AuthSource>) -> Self {
        self.register(source);
        self
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn AuthSource>> {
        self.sources.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("SourceRegistry").field("sources", &ids).finish()
    }
}
