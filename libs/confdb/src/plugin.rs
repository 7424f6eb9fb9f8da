//! Backend plug-in resolution.
//!
//! A backend is selected by a spec of the form `NAME` or `NAME:PARAMS`.
//! Resolution first consults the process-global registry of built-in
//! factories (the bundled in-memory backend registers itself there), then
//! falls back to loading a shared module named after `NAME` and calling its
//! factory symbol `_NAME_backend_creator_`.
//!
//! Loaded module handles are retained for the process lifetime. Unloading a
//! module while factory-created state is still reachable is unsound, so
//! handles are deliberately never closed.

use dashmap::DashMap;
use lazy_static::lazy_static;

use crate::backend::{memory, Backend};
use crate::error::{ConfigError, Result};

/// Parsed backend spec: plug-in name and its parameter string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub params: String,
}

impl BackendSpec {
    /// Parse `NAME[:PARAMS]`. An empty spec falls back to the
    /// [`crate::ENV_BACKEND`] environment variable.
    pub fn parse(spec: &str) -> Result<BackendSpec> {
        let spec = if spec.is_empty() {
            std::env::var(crate::ENV_BACKEND).unwrap_or_default()
        } else {
            spec.to_string()
        };
        if spec.is_empty() {
            return Err(ConfigError::generic(format!(
                "no database parameter found (check parameter of the constructor or value of {} environment variable)",
                crate::ENV_BACKEND
            )));
        }
        Ok(match spec.split_once(':') {
            Some((name, params)) => BackendSpec {
                name: name.to_string(),
                params: params.to_string(),
            },
            None => BackendSpec {
                name: spec,
                params: String::new(),
            },
        })
    }
}

/// Factory signature every backend plug-in exports.
pub type BackendFactory = fn(&str) -> Result<Box<dyn Backend>>;

lazy_static! {
    static ref BUILTIN: DashMap<String, BackendFactory> = {
        let registry = DashMap::new();
        registry.insert("memory".to_string(), memory::create as BackendFactory);
        registry
    };
}

/// Register an in-process backend factory under a plug-in name, bypassing
/// dynamic loading for that name.
pub fn register_backend(name: &str, factory: BackendFactory) {
    tracing::debug!(name, "register builtin backend factory");
    BUILTIN.insert(name.to_string(), factory);
}

/// Handle of a dynamically loaded plug-in module. Kept alive for the
/// facade's lifetime; never unloaded (see module docs).
#[derive(Debug)]
pub(crate) struct PluginHandle {
    _library: Option<libloading::Library>,
}

/// Resolve a spec to a backend instance.
pub(crate) fn load_backend(spec: &BackendSpec) -> Result<(Box<dyn Backend>, PluginHandle)> {
    if let Some(factory) = BUILTIN.get(&spec.name) {
        tracing::debug!(name = %spec.name, "create backend from builtin factory");
        let backend = (factory.value())(&spec.params)?;
        return Ok((backend, PluginHandle { _library: None }));
    }

    let module_name = libloading::library_filename(&spec.name);
    tracing::info!(module = ?module_name, "load backend plug-in");
    let library = unsafe { libloading::Library::new(&module_name) }.map_err(|e| {
        ConfigError::load(format!(
            "failed to load backend plug-in '{}': \"{}\"",
            module_name.to_string_lossy(),
            e
        ))
    })?;

    let symbol_name = format!("_{}_backend_creator_", spec.name);
    let backend = {
        let factory: libloading::Symbol<'_, BackendFactory> =
            unsafe { library.get(symbol_name.as_bytes()) }.map_err(|e| {
                ConfigError::load(format!(
                    "failed to find backend creator function '{}' in plug-in '{}': \"{}\"",
                    symbol_name,
                    module_name.to_string_lossy(),
                    e
                ))
            })?;
        factory(&spec.params)?
    };

    Ok((
        backend,
        PluginHandle {
            _library: Some(library),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let spec = BackendSpec::parse("memory").unwrap();
        assert_eq!(spec.name, "memory");
        assert_eq!(spec.params, "");
    }

    #[test]
    fn test_parse_name_and_params() {
        let spec = BackendSpec::parse("rdb:server:with:colons").unwrap();
        assert_eq!(spec.name, "rdb");
        assert_eq!(spec.params, "server:with:colons");
    }

    #[test]
    fn test_builtin_memory_factory_resolves() {
        let spec = BackendSpec::parse("memory").unwrap();
        let (backend, _handle) = load_backend(&spec).unwrap();
        assert!(!backend.loaded());
    }

    #[test]
    fn test_unknown_plugin_is_a_load_error() {
        let spec = BackendSpec::parse("no_such_backend_plugin").unwrap();
        let err = load_backend(&spec).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
        assert!(err.to_string().contains("failed to load backend plug-in"));
    }
}
