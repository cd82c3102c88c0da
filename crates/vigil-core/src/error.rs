//! Error types for readiness checks and tunnels
//!
//! Every failure the harness can produce is returned to the immediate caller.
//! Variants carry enough context (condition description, resource identity,
//! selector, endpoint) to turn straight into a readable test failure.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for vigil operations
#[derive(Debug, Error)]
pub enum Error {
    /// A condition was not satisfied before its deadline
    #[error("timed out after {elapsed:?} waiting for {description} (last observed: {})", .last_observed.as_deref().unwrap_or("nothing"))]
    Timeout {
        /// Description of the condition being awaited
        description: String,
        /// Time spent polling before giving up
        elapsed: Duration,
        /// Summary of the last observation (state or observation error)
        last_observed: Option<String>,
    },

    /// A selection query matched no resources
    #[error("no {kind} found in namespace {namespace} matching {selector}")]
    NotFound {
        /// Resource kind that was listed
        kind: String,
        /// Namespace that was searched
        namespace: String,
        /// Rendered label selector
        selector: String,
    },

    /// The forward could not be established or died
    #[error("tunnel error for {endpoint}: {message}")]
    Tunnel {
        /// Remote endpoint the tunnel targets (e.g. "ns/pod:7233")
        endpoint: String,
        /// Description of what failed
        message: String,
    },

    /// The observation source could not be reached or answered with an error
    #[error("observation error for {resource}: {message}")]
    Observation {
        /// Resource being observed (e.g. "Deployment ns/postgres")
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid arguments (poll spec, query, options)
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// A manifest could not be read, parsed or applied
    #[error("manifest error [{path}]: {message}")]
    Manifest {
        /// File or directory the manifest came from
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Configuration could not be loaded
    #[error("config error [{context}]: {message}")]
    Config {
        /// Where the bad value came from (env var, file, field)
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Local I/O failure
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a timeout error for the given condition
    pub fn timeout(
        description: impl Into<String>,
        elapsed: Duration,
        last_observed: Option<String>,
    ) -> Self {
        Self::Timeout {
            description: description.into(),
            elapsed,
            last_observed,
        }
    }

    /// Create a not-found error for a selection query
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            selector: selector.into(),
        }
    }

    /// Create a tunnel error without endpoint context
    pub fn tunnel(msg: impl Into<String>) -> Self {
        Self::Tunnel {
            endpoint: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a tunnel error for a specific endpoint
    pub fn tunnel_for(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tunnel {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create an observation error for a specific resource
    pub fn observation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Observation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a manifest error for a file or directory
    pub fn manifest(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if retrying the same operation might succeed
    ///
    /// Observation and tunnel failures are usually transient (API server
    /// blips, pod restarts). Everything else needs a change in input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Observation { .. } => true,
            Error::Tunnel { .. } => true,
            Error::Io { .. } => true,
            Error::Timeout { .. } => false,
            Error::NotFound { .. } => false,
            Error::Validation { .. } => false,
            Error::Manifest { .. } => false,
            Error::Config { .. } => false,
        }
    }

    /// Get the resource, endpoint or path this error is about, if any
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Timeout { description, .. } => Some(description),
            Error::Tunnel { endpoint, .. } => Some(endpoint),
            Error::Observation { resource, .. } => Some(resource),
            Error::Manifest { path, .. } => Some(path),
            Error::Config { context, .. } => Some(context),
            Error::NotFound { .. } | Error::Validation { .. } | Error::Io { .. } => None,
        }
    }

    /// Whether this is a deadline expiry rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
