use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::element::Element;

type Constructor = Arc<dyn Fn(&str) -> Element + Send + Sync>;

/// Table of element factories, keyed by factory name.
///
/// Cloning shares the table. Use [`Registry::fork`] for an independent copy.
#[derive(Clone, Default)]
pub struct Registry {
    factories: Arc<RwLock<HashMap<String, Constructor>>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// A registry with no factories.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every element this crate provides.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        crate::elements::register_builtins(&registry);
        crate::source::register(&registry);
        registry
    }

    /// The process-wide registry, filled with the built-in elements on
    /// first use.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Self::with_builtins)
    }

    /// Independent copy of the current table.
    pub fn fork(&self) -> Registry {
        Registry {
            factories: Arc::new(RwLock::new(self.factories.read().clone())),
        }
    }

    /// Register `factory`. Registering a name twice keeps the first one.
    pub fn register<F>(&self, factory: &str, constructor: F) -> bool
    where
        F: Fn(&str) -> Element + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        if factories.contains_key(factory) {
            warn!(factory, "element factory already registered");
            return false;
        }
        factories.insert(factory.to_owned(), Arc::new(constructor));
        debug!(factory, "registered element factory");
        true
    }

    pub fn unregister(&self, factory: &str) -> bool {
        self.factories.write().remove(factory).is_some()
    }

    pub fn contains(&self, factory: &str) -> bool {
        self.factories.read().contains_key(factory)
    }

    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate `factory`. Without a `name`, one is derived from the
    /// factory name and a process-wide counter.
    pub fn make(&self, factory: &str, name: Option<&str>) -> Option<Element> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let constructor = self.factories.read().get(factory).cloned();
        let Some(constructor) = constructor else {
            debug!(factory, "no such element factory");
            return None;
        };
        let name = match name {
            Some(name) => name.to_owned(),
            None => format!("{factory}{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
        };
        Some(constructor(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::global();
        for factory in [
            "queue",
            "capsfilter",
            "audioconvert",
            "deinterleave",
            "interleave",
            "appsink",
            "wavenc",
            "wavparse",
            "audiotestsrc",
            "fakesink",
            crate::source::WEB_AUDIO_SRC_FACTORY,
        ] {
            assert!(registry.contains(factory), "{factory} missing");
        }
    }

    #[test]
    fn fork_is_independent() {
        let registry = Registry::with_builtins();
        let fork = registry.fork();
        assert!(fork.unregister("wavparse"));
        assert!(fork.make("wavparse", None).is_none());
        assert!(registry.make("wavparse", Some("parser")).is_some());
    }

    #[test]
    fn generated_names_are_unique() {
        let registry = Registry::with_builtins();
        let a = registry.make("queue", None).unwrap();
        let b = registry.make("queue", None).unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(a.factory_name(), "queue");
    }
}
