//! Error types for the cutepod crate.
//!
//! Every failure the reconciler can surface falls into one of five observable
//! categories (validation, dependency, engine, comparison, configuration),
//! which drive both retry behaviour and the error entries reported to the CLI.

use thiserror::Error;

/// Result type for cutepod operations
pub type Result<T> = std::result::Result<T, Error>;

/// Observable error category, as reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// A manifest or registry invariant is broken
    Validation,
    /// An unresolved reference or dependency cycle
    Dependency,
    /// An underlying container engine call failed
    Engine,
    /// An equivalence check failed at runtime
    Comparison,
    /// Missing manager, cancellation, or internal invariant
    Configuration,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Dependency => write!(f, "dependency"),
            Self::Engine => write!(f, "engine"),
            Self::Comparison => write!(f, "comparison"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Main error type for all cutepod operations
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest failed validation
    #[error("validation failed for {resource}: {message}")]
    Validation {
        /// `kind/name` of the offending resource, or the document position
        resource: String,
        /// What invariant was broken
        message: String,
        /// JSON-path-style locator into the source document, when known
        locator: Option<String>,
    },

    /// Two manifests share the same `(kind, name)` key
    #[error("duplicate resource {resource}")]
    Duplicate {
        /// `kind/name` of the duplicated resource
        resource: String,
    },

    /// A declared dependency does not resolve, or the graph has a cycle
    #[error("dependency error: {message}")]
    Dependency {
        /// Description naming the unresolved reference or a cycle member
        message: String,
    },

    /// An engine operation failed
    #[error("engine operation '{operation}' failed: {message}")]
    Engine {
        /// The operation that failed (e.g. "container create")
        operation: String,
        /// Error detail from the engine
        message: String,
    },

    /// The engine does not know the named object
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Object kind (container, network, volume, secret, image)
        kind: String,
        /// The name that was not found
        name: String,
    },

    /// The engine already has an object with this name
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Object kind (container, network, volume, secret)
        kind: String,
        /// The conflicting name
        name: String,
    },

    /// Operation exceeded its deadline
    #[error("operation '{operation}' timed out after {timeout_seconds} seconds")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Number of seconds after which the operation timed out
        timeout_seconds: u64,
    },

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// An equivalence check could not be computed
    #[error("comparison failed for {resource}: {message}")]
    Comparison {
        /// `kind/name` of the pair being compared
        resource: String,
        /// Why the comparison failed
        message: String,
    },

    /// Invalid configuration or internal invariant violation
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// IO error occurred during operation
    #[error("IO error: {message}")]
    Io {
        /// Error message describing the IO failure
        message: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing or serialization error (engine payloads)
    #[error("JSON error: {message}")]
    Json {
        /// Error message describing the JSON failure
        message: String,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// YAML parsing error (manifests)
    #[error("YAML error: {message}")]
    Yaml {
        /// Error message describing the YAML failure
        message: String,
        /// The underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Create a new validation error without a locator
    pub fn validation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: message.into(),
            locator: None,
        }
    }

    /// Create a new validation error annotated with a JSON-path locator
    pub fn validation_at(
        resource: impl Into<String>,
        locator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: message.into(),
            locator: Some(locator.into()),
        }
    }

    /// Create a new dependency error
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency {
            message: message.into(),
        }
    }

    /// Create a new engine error
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a new already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a new comparison error
    pub fn comparison(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Comparison {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Get the observable category for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::Duplicate { .. } | Self::Yaml { .. } => {
                ErrorCategory::Validation
            }
            Self::Dependency { .. } => ErrorCategory::Dependency,
            Self::Engine { .. }
            | Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::Timeout { .. }
            | Self::Io { .. }
            | Self::Json { .. } => ErrorCategory::Engine,
            Self::Comparison { .. } => ErrorCategory::Comparison,
            Self::Configuration { .. } | Self::Cancelled => ErrorCategory::Configuration,
        }
    }

    /// Check whether a failed operation may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Engine { .. }
                | Self::Timeout { .. }
                | Self::Io { .. }
                | Self::Json { .. }
                | Self::Comparison { .. }
        )
    }

    /// The JSON-path locator attached to a validation error, if any
    pub fn locator(&self) -> Option<&str> {
        match self {
            Self::Validation { locator, .. } => locator.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::validation("Container/web", "empty image").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            Error::dependency("cycle detected").category(),
            ErrorCategory::Dependency
        );
        assert_eq!(
            Error::engine("container create", "boom").category(),
            ErrorCategory::Engine
        );
        assert_eq!(
            Error::not_found("network", "web").category(),
            ErrorCategory::Engine
        );
        assert_eq!(
            Error::comparison("Container/web", "bad record").category(),
            ErrorCategory::Comparison
        );
        assert_eq!(Error::Cancelled.category(), ErrorCategory::Configuration);
        assert_eq!(
            Error::configuration("no manager").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::engine("list", "socket hiccup").is_recoverable());
        assert!(Error::timeout("container stop", 20).is_recoverable());
        assert!(Error::comparison("Container/web", "x").is_recoverable());
        assert!(!Error::validation("Container/web", "x").is_recoverable());
        assert!(!Error::dependency("x").is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::not_found("container", "web").is_recoverable());
    }

    #[test]
    fn test_locator_round_trip() {
        let err = Error::validation_at("Container/web", "spec.volumes[0].subPath", "no '..'");
        assert_eq!(err.locator(), Some("spec.volumes[0].subPath"));
        let plain = Error::validation("Container/web", "empty image");
        assert_eq!(plain.locator(), None);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Engine.to_string(), "engine");
        assert_eq!(ErrorCategory::Configuration.to_string(), "configuration");
    }
}
