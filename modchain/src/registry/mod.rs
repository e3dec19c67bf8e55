//! The module catalog.
//!
//! The engine only reads from the catalog: it looks modules up by category
//! or id and asks for their executors. [`InMemoryRegistry`] is the bundled
//! implementation; anything else can plug in through [`ModuleRegistry`].

mod descriptor;
mod memory;
mod module;
pub mod rules;

pub use descriptor::ModuleDescriptor;
pub use memory::InMemoryRegistry;
pub use module::{AsyncFnModule, FnModule, Module};
pub use rules::{RuleCondition, SelectionRule, SelectionSignals};

use std::sync::Arc;

/// Read-only lookup contract against the module catalog.
#[cfg_attr(test, mockall::automock)]
pub trait ModuleRegistry: Send + Sync {
    /// Returns every module serving `category`.
    fn find_by_category(&self, category: &str) -> Vec<ModuleDescriptor>;

    /// Returns one module's descriptor.
    fn describe(&self, module_id: &str) -> Option<ModuleDescriptor>;

    /// Returns the executor behind a module, if one is available.
    fn executor(&self, module_id: &str) -> Option<Arc<dyn Module>>;
}
