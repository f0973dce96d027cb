use std::sync::Arc;

use thiserror::Error;

use crate::{dependency_graph::DependencyGraphErrors, types::DynError};

/// Any error surfaced by opening or closing a container
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    /// The definition has no valid resolution order
    #[error(transparent)]
    Graph(#[from] DependencyGraphErrors),
    /// Building one of the resources failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The container or its scope was already entered
    #[error("Container instance cannot be reused. Create a new instance for each usage.")]
    Reuse,
    /// A cleanup was registered on a scope that is not entered
    #[error("Cleanups can only be registered while the scope is entered")]
    ScopeInactive,
    /// One or more cleanups failed while closing
    #[error(transparent)]
    Teardown(#[from] TeardownErrors),
    /// Opening failed and unwinding the partially built resources failed as well
    #[error("{error}\nUnwinding the partially built resources also failed: {teardown}")]
    Unwound {
        error: Box<ContainerError>,
        teardown: TeardownErrors,
    },
}
impl ContainerError {
    /// Attaches teardown failures collected while unwinding a failed open
    pub(crate) fn unwound(self, teardown: Option<TeardownErrors>) -> Self {
        match teardown {
            Some(teardown) => ContainerError::Unwound {
                error: Box::new(self),
                teardown,
            },
            None => self,
        }
    }

    /// The error which caused the failure, skipping any unwind information
    pub fn cause(&self) -> &ContainerError {
        match self {
            ContainerError::Unwound { error, .. } => error.cause(),
            other => other,
        }
    }

    /// Teardown failures carried by this error, if any
    pub fn teardown_errors(&self) -> Option<&TeardownErrors> {
        match self {
            ContainerError::Teardown(teardown) | ContainerError::Unwound { teardown, .. } => {
                Some(teardown)
            }
            _ => None,
        }
    }
}

/// Errors while resolving a single dependency
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// A referenced dependency was not constructed before its dependant
    #[error("Cannot resolve dependency '{dependency}' for '{required_by}': it has not been constructed yet")]
    DependencyNotResolved {
        dependency: String,
        required_by: String,
    },
    /// A Factory failed to build
    #[error("Factory for '{name}' failed - error: {error}")]
    FactoryFailed { name: String, error: Arc<DynError> },
    /// The cleanup extractor attached to a factory failed
    #[error("Cleanup extractor for '{name}' failed - error: {error}")]
    CleanupExtractorFailed { name: String, error: Arc<DynError> },
    /// The resolved resources could not be turned into the requested bundle
    #[error("Failed to assemble the resource bundle: {0}")]
    Assemble(#[source] RequireError),
}

/// Errors when trying to require a value by name
#[derive(Error, Debug, Clone)]
pub enum RequireError {
    /// Nothing is known under the name
    #[error("'{0}' is not known.")]
    Missing(String),

    #[error("Failed to downcast '{name}', required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        name: String,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// A single failed cleanup
#[derive(Error, Debug, Clone)]
pub enum TeardownError {
    #[error("Cleanup for '{resource}' failed - error: {error}")]
    Failed {
        resource: String,
        error: Arc<DynError>,
    },
    #[error("Cleanup for '{resource}' panicked: {message}")]
    Panicked { resource: String, message: String },
}
impl TeardownError {
    pub fn resource(&self) -> &str {
        match self {
            TeardownError::Failed { resource, .. } | TeardownError::Panicked { resource, .. } => {
                resource
            }
        }
    }
}

/// All cleanups which failed while closing a scope, in the order they ran
#[derive(Error, Debug, Clone)]
pub struct TeardownErrors {
    pub errors: Vec<TeardownError>,
}
impl TeardownErrors {
    /// The first failure, which is the one of the most recently registered cleanup
    pub fn first(&self) -> Option<&TeardownError> {
        self.errors.first()
    }
}
impl std::fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("One or more cleanups failed:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}
