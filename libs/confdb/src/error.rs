//! Error types reported by the configuration library.
//!
//! Every failure surfaces as a [`ConfigError`]. Backend and plugin failures
//! are wrapped into [`ConfigError::Generic`] with a context sentence and the
//! original error preserved as the cause, so callers see both what the
//! library was doing and why the backend refused.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Error raised by configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Any wrapped backend failure, plugin load failure, invalid argument
    /// or bad cast. Carries a human-readable message and an optional cause.
    Generic {
        message: String,
        cause: Option<anyhow::Error>,
    },

    /// A requested class, object, attribute or database name is absent.
    NotFound { kind: &'static str, name: String },

    /// Access to an object known to have been deleted.
    DeletedObject {
        class_name: String,
        object_id: String,
    },

    /// A backend plug-in cannot be loaded or lacks the factory symbol.
    Load { message: String },

    /// A commit was rejected by the backend.
    Commit {
        message: String,
        cause: Option<anyhow::Error>,
    },
}

impl ConfigError {
    /// Create a generic error without a cause.
    pub fn generic(message: impl Into<String>) -> Self {
        ConfigError::Generic {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a generic error wrapping a cause.
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        ConfigError::Generic {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Create a not-found error; `kind` names what was looked up
    /// ("class", "object", "database", ...).
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ConfigError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a deleted-object error.
    pub fn deleted(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        ConfigError::DeletedObject {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Create a plug-in load error.
    pub fn load(message: impl Into<String>) -> Self {
        ConfigError::Load {
            message: message.into(),
        }
    }

    /// Wrap a generic error with an operation context, preserving the
    /// original as the cause. Non-generic kinds (not-found, deleted-object,
    /// load) pass through unchanged so callers can still match on them.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        match self {
            e @ ConfigError::Generic { .. } | e @ ConfigError::Commit { .. } => {
                ConfigError::Generic {
                    message: context.into(),
                    cause: Some(anyhow::Error::new(e)),
                }
            }
            other => other,
        }
    }

    /// True for the not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::NotFound { .. })
    }

    /// True for the deleted-object kind.
    pub fn is_deleted_object(&self) -> bool {
        matches!(self, ConfigError::DeletedObject { .. })
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Generic { message, cause } => {
                write!(f, "{}", message)?;
                if let Some(cause) = cause {
                    write!(f, " was caused by: {}", cause)?;
                }
                Ok(())
            }
            ConfigError::NotFound { kind, name } => {
                write!(f, "{} \"{}\" is not found", kind, name)
            }
            ConfigError::DeletedObject {
                class_name,
                object_id,
            } => {
                write!(f, "object '{}@{}' was deleted", object_id, class_name)
            }
            ConfigError::Load { message } => write!(f, "{}", message),
            ConfigError::Commit { message, cause } => {
                write!(f, "{}", message)?;
                if let Some(cause) = cause {
                    write!(f, " was caused by: {}", cause)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Generic {
                cause: Some(cause), ..
            }
            | ConfigError::Commit {
                cause: Some(cause), ..
            } => Some(&**cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let e = ConfigError::not_found("class", "Dummy");
        assert_eq!(e.to_string(), "class \"Dummy\" is not found");
    }

    #[test]
    fn test_deleted_object_display() {
        let e = ConfigError::deleted("Dummy", "#1");
        assert_eq!(e.to_string(), "object '#1@Dummy' was deleted");
    }

    #[test]
    fn test_wrap_preserves_not_found() {
        let e = ConfigError::not_found("object", "#1@Dummy").wrap("failed to get object");
        assert!(e.is_not_found());
    }

    #[test]
    fn test_wrap_generic_keeps_cause_chain() {
        let e = ConfigError::generic("backend refused").wrap("failed to commit");
        let text = e.to_string();
        assert!(text.starts_with("failed to commit"));
        assert!(text.contains("backend refused"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
