//! Registry surface consumed by generated typed wrappers.
//!
//! The DAL code generator produces one wrapper type per schema class and a
//! cache of wrapper instances per facade. Those caches must be kept
//! coherent with the implementation objects underneath, so each registered
//! class supplies a [`TemplateCache`] factory; the facade instantiates the
//! cache on first use and drives it through the hooks below on every change
//! batch, rename, abort and unload.
//!
//! The registry is process-wide and only extended at module-load time, so a
//! read-mostly sharing discipline suffices after initialisation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;

use crate::change::Change;
use crate::error::{ConfigError, Result};
use crate::intern::ClassName;

/// Per-facade cache of generated wrapper objects for one class.
///
/// Implementations are installed by generated code; the facade calls the
/// hooks with the template mutex held.
pub trait TemplateCache: Send {
    /// A change batch touched this class (directly or through inheritance).
    fn update(&mut self, change: &Change);

    /// Invalidate every wrapper: the underlying data was reloaded.
    fn unread(&mut self);

    /// Relocate a wrapper after an object rename.
    fn rename(&mut self, old_id: &str, new_id: &str);

    /// UIDs of wrappers read so far, for the profiling report.
    fn accessed(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Factory producing an empty [`TemplateCache`] for one class.
pub type TemplateCacheFactory = Arc<dyn Fn() -> Box<dyn TemplateCache> + Send + Sync>;

/// Functions a generated wrapper class registers for itself.
#[derive(Clone)]
pub struct DalFunctions {
    pub cache_factory: TemplateCacheFactory,
}

impl fmt::Debug for DalFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DalFunctions").finish_non_exhaustive()
    }
}

lazy_static! {
    static ref REGISTRY: DashMap<String, DalFunctions> = DashMap::new();
}

/// Register the functions of one generated class. Later registrations for
/// the same name win, which lets tests install probes.
pub fn register_class(class_name: &str, functions: DalFunctions) {
    tracing::debug!(class = class_name, "register generated wrapper class");
    REGISTRY.insert(class_name.to_string(), functions);
}

/// True when a wrapper class is registered under this name.
pub fn is_registered(class_name: &str) -> bool {
    REGISTRY.contains_key(class_name)
}

/// Look up the functions of a class.
///
/// With `upcast_unregistered`, an unregistered class resolves to the first
/// registered class among its superclasses, letting generic code handle
/// objects of schema classes that never got a generated wrapper.
pub(crate) fn functions(
    class_name: &ClassName,
    superclasses: &HashMap<ClassName, Vec<ClassName>>,
    upcast_unregistered: bool,
) -> Result<DalFunctions> {
    if let Some(found) = REGISTRY.get(class_name.as_str()) {
        return Ok(found.clone());
    }
    if upcast_unregistered {
        if let Some(supers) = superclasses.get(class_name) {
            for superclass in supers {
                if let Some(found) = REGISTRY.get(superclass.as_str()) {
                    tracing::debug!(
                        class = %class_name,
                        base = %superclass,
                        "use first suitable base class instead of unregistered wrapper class"
                    );
                    return Ok(found.clone());
                }
            }
        }
    }
    Err(ConfigError::generic(format!(
        "generated wrapper class '{}' was not registered",
        class_name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;
    use std::sync::Mutex;

    struct Probe {
        updates: Arc<Mutex<Vec<String>>>,
    }

    impl TemplateCache for Probe {
        fn update(&mut self, change: &Change) {
            self.updates
                .lock()
                .unwrap()
                .push(change.class_name.clone());
        }

        fn unread(&mut self) {}

        fn rename(&mut self, _old_id: &str, _new_id: &str) {}
    }

    fn probe_functions(updates: Arc<Mutex<Vec<String>>>) -> DalFunctions {
        DalFunctions {
            cache_factory: Arc::new(move || {
                Box::new(Probe {
                    updates: updates.clone(),
                })
            }),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        register_class("DalTestAlpha", probe_functions(updates.clone()));
        assert!(is_registered("DalTestAlpha"));

        let name = intern::class_name("DalTestAlpha");
        let functions = functions(&name, &HashMap::new(), false).unwrap();
        let mut cache = (functions.cache_factory)();
        cache.update(&Change::new("DalTestAlpha"));
        assert_eq!(updates.lock().unwrap().as_slice(), ["DalTestAlpha"]);
    }

    #[test]
    fn test_unregistered_class_is_an_error() {
        let name = intern::class_name("DalTestUnknown");
        let err = functions(&name, &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("was not registered"));
    }

    #[test]
    fn test_upcast_to_registered_superclass() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        register_class("DalTestBase", probe_functions(updates));

        let derived = intern::class_name("DalTestDerived");
        let supers = HashMap::from([(
            derived.clone(),
            vec![intern::class_name("DalTestBase")],
        )]);
        assert!(functions(&derived, &supers, false).is_err());
        assert!(functions(&derived, &supers, true).is_ok());
    }
}
