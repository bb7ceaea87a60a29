//! Error types for the edge cluster manager
//!
//! Errors are structured with fields to aid debugging in production. Every
//! variant maps onto one [`ErrorKind`], which is what callers branch on:
//! "create if missing" logic keys off `NotFound`, idempotent creates swallow
//! `AlreadyExists`, and label writes retry `Conflict`.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Error classes the controllers branch on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Object does not exist; drives "create if missing"
    NotFound,
    /// Object already exists; swallowed where creation must be idempotent
    AlreadyExists,
    /// Optimistic-concurrency failure ("object has been modified")
    Conflict,
    /// Malformed user input; never retried until the input changes
    InvalidConfig,
    /// Unknown control-plane / infrastructure provider pair
    Unsupported,
    /// ClusterTemplate still referenced by live Clusters
    InUse,
    /// Zero or several templates carry the default marker
    DefaultNotFound,
    /// Any other remote failure
    Transient,
}

/// Main error type for cluster manager operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Object lookup failed
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Namespace of the object (empty for cluster-scoped)
        namespace: String,
        /// Object name
        name: String,
    },

    /// Object creation collided with an existing object
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Namespace of the object (empty for cluster-scoped)
        namespace: String,
        /// Object name
        name: String,
    },

    /// Write rejected because the object changed since it was read
    #[error("conflict updating {kind} {name}: {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Server-provided message
        message: String,
    },

    /// Invalid template configuration
    #[error("invalid configuration for {template}: {message}")]
    InvalidConfig {
        /// Name of the template carrying the bad configuration
        template: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.clusterConfiguration")
        field: Option<String>,
    },

    /// No provider strategy registered for the pair
    #[error("unsupported provider pair: control plane {control_plane}, infrastructure {infra}")]
    Unsupported {
        /// Control-plane provider kind as written in the template
        control_plane: String,
        /// Infrastructure provider kind as written in the template
        infra: String,
    },

    /// ClusterTemplate deletion blocked by referencing Clusters
    #[error("cluster template {template} is in use by clusters: {}", clusters.join(", "))]
    InUse {
        /// Template being deleted
        template: String,
        /// Clusters referencing the template's ClusterClass
        clusters: Vec<String>,
    },

    /// Default template lookup did not resolve to exactly one template
    #[error("default template not found in {namespace}: {matches} templates carry the default label")]
    DefaultNotFound {
        /// Tenant namespace
        namespace: String,
        /// Number of templates that matched the default selector
        matches: usize,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// External tenant datamodel failure
    #[error("datamodel error [{operation}]: {message}")]
    Datamodel {
        /// Datamodel operation that failed
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "store", "tenant")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given object
    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for the given object
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-configuration error without template context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            template: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-configuration error for a template
    pub fn invalid_config(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            template: template.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-configuration error for a template and field path
    pub fn invalid_config_field(
        template: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            template: template.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an unsupported-provider error
    pub fn unsupported(control_plane: impl Into<String>, infra: impl Into<String>) -> Self {
        Self::Unsupported {
            control_plane: control_plane.into(),
            infra: infra.into(),
        }
    }

    /// Create an in-use error listing the referencing Clusters
    pub fn in_use(template: impl Into<String>, clusters: Vec<String>) -> Self {
        Self::InUse {
            template: template.into(),
            clusters,
        }
    }

    /// Create a default-template lookup error
    pub fn default_not_found(namespace: impl Into<String>, matches: usize) -> Self {
        Self::DefaultNotFound {
            namespace: namespace.into(),
            matches,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a datamodel error
    pub fn datamodel(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Datamodel {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify this error
    ///
    /// API errors are classified by status code: 404 is `NotFound`, 409 with
    /// reason `AlreadyExists` is `AlreadyExists`, any other 409 is `Conflict`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 404 => ErrorKind::NotFound,
                kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                    ErrorKind::AlreadyExists
                }
                kube::Error::Api(ae) if ae.code == 409 => ErrorKind::Conflict,
                _ => ErrorKind::Transient,
            },
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Error::Serialization { .. } => ErrorKind::InvalidConfig,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::InUse { .. } => ErrorKind::InUse,
            Error::DefaultNotFound { .. } => ErrorKind::DefaultNotFound,
            Error::Datamodel { .. } => ErrorKind::Transient,
            Error::Internal { .. } => ErrorKind::Transient,
        }
    }

    /// True if the object was missing
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True if a create collided with an existing object
    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// True if a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if this error is retryable
    ///
    /// Invalid configuration and unsupported providers need a spec edit.
    /// Conflicts and transient API failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Conflict | ErrorKind::Transient => true,
            ErrorKind::NotFound | ErrorKind::AlreadyExists => true,
            ErrorKind::InUse | ErrorKind::DefaultNotFound => true,
            ErrorKind::InvalidConfig | ErrorKind::Unsupported => false,
        }
    }

    /// Get the template name if this error is associated with one
    pub fn template(&self) -> Option<&str> {
        match self {
            Error::InvalidConfig { template, .. } => Some(template),
            Error::InUse { template, .. } => Some(template),
            _ => None,
        }
    }
}
