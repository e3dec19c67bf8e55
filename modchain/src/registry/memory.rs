//! In-memory module registry.

use super::{Module, ModuleDescriptor, ModuleRegistry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct Entry {
    descriptor: ModuleDescriptor,
    executor: Option<Arc<dyn Module>>,
}

/// A registry holding descriptors and executors in memory.
///
/// Descriptors can be loaded from a JSON catalog and executors attached
/// afterwards, so the catalog and the code behind it can come from
/// different places.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads descriptors from a JSON array. No executors are attached.
    pub fn from_descriptors_json(json: &str) -> Result<Self, serde_json::Error> {
        let descriptors: Vec<ModuleDescriptor> = serde_json::from_str(json)?;
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register_descriptor(descriptor);
        }
        Ok(registry)
    }

    /// Registers a descriptor together with its executor.
    pub fn register(&self, descriptor: ModuleDescriptor, executor: Arc<dyn Module>) {
        if executor.id() != descriptor.id {
            warn!(
                descriptor = %descriptor.id,
                executor = %executor.id(),
                "Executor id differs from descriptor id"
            );
        }
        self.insert(descriptor, Some(executor));
    }

    /// Registers a descriptor without an executor.
    pub fn register_descriptor(&self, descriptor: ModuleDescriptor) {
        self.insert(descriptor, None);
    }

    /// Attaches an executor to an already registered descriptor.
    ///
    /// Returns false if no descriptor with that id exists.
    pub fn attach_executor(&self, module_id: &str, executor: Arc<dyn Module>) -> bool {
        match self.entries.write().get_mut(module_id) {
            Some(entry) => {
                entry.executor = Some(executor);
                true
            }
            None => false,
        }
    }

    /// Returns the number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn insert(&self, descriptor: ModuleDescriptor, executor: Option<Arc<dyn Module>>) {
        let id = descriptor.id.clone();
        debug!(module_id = %id, category = %descriptor.category, "Registering module");
        let previous = self.entries.write().insert(
            id.clone(),
            Entry {
                descriptor,
                executor,
            },
        );
        if previous.is_some() {
            warn!(module_id = %id, "Replaced existing module registration");
        }
    }
}

impl std::fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("modules", &self.len())
            .finish()
    }
}

impl ModuleRegistry for InMemoryRegistry {
    fn find_by_category(&self, category: &str) -> Vec<ModuleDescriptor> {
        let mut found: Vec<_> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.descriptor.category == category)
            .map(|entry| entry.descriptor.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn describe(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.entries
            .read()
            .get(module_id)
            .map(|entry| entry.descriptor.clone())
    }

    fn executor(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.entries
            .read()
            .get(module_id)
            .and_then(|entry| entry.executor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FnModule;
    use serde_json::Value;

    fn echo(id: &str) -> Arc<dyn Module> {
        Arc::new(FnModule::new(id, |input: Value| Ok(input)))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = InMemoryRegistry::new();
        registry.register(ModuleDescriptor::new("b", "ocr"), echo("b"));
        registry.register(ModuleDescriptor::new("a", "ocr"), echo("a"));
        registry.register(ModuleDescriptor::new("c", "tts"), echo("c"));

        let ids: Vec<_> = registry
            .find_by_category("ocr")
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.describe("c").is_some());
        assert!(registry.executor("c").is_some());
        assert!(registry.describe("missing").is_none());
        assert!(registry.find_by_category("none").is_empty());
    }

    #[test]
    fn test_from_json_then_attach() {
        let registry = InMemoryRegistry::from_descriptors_json(
            r#"[
                {"id": "ocr-fast", "category": "ocr", "declared_reliability": 0.9},
                {"id": "ocr-slow", "category": "ocr", "alternatives": ["ocr-fast"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.executor("ocr-fast").is_none());
        assert!(registry.attach_executor("ocr-fast", echo("ocr-fast")));
        assert!(!registry.attach_executor("unknown", echo("unknown")));
        assert!(registry.executor("ocr-fast").is_some());
        assert_eq!(
            registry.describe("ocr-slow").unwrap().alternatives,
            vec!["ocr-fast".to_string()]
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(InMemoryRegistry::from_descriptors_json("{not json").is_err());
    }
}
