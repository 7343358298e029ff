//! Error types for the serving operator
//!
//! Errors carry the identity of the object they concern (kind, name, instance)
//! so a failed reconcile can be diagnosed from a single log line.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for serving operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The referenced object does not exist in the cluster
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespaced name of the missing object
        name: String,
    },

    /// Write rejected because the object changed or already exists
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        /// Kind of the conflicting object
        kind: String,
        /// Namespaced name of the conflicting object
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// The API server does not serve the requested kind
    #[error("kind {kind} is not served for {api_version}")]
    UnknownKind {
        /// Requested apiVersion
        api_version: String,
        /// Requested kind
        kind: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A manifest transform rejected the instance configuration
    #[error("transform {transform} failed on {resource}: {message}")]
    Transform {
        /// Name of the transform that failed
        transform: String,
        /// Resource being transformed
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Applying a manifest resource failed
    #[error("apply of {resource} failed: {message}")]
    Apply {
        /// Resource that could not be applied
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// A platform extension hook failed
    #[error("{extension} hook {hook} failed: {message}")]
    Hook {
        /// Platform extension that owns the hook
        extension: String,
        /// Hook name
        hook: String,
        /// Description of what failed
        message: String,
    },

    /// An event for an older generation than one already reconciled
    #[error("reconciling obsolete generation of {key}: {observed} < {last_seen}")]
    StaleGeneration {
        /// namespace/name of the instance
        key: String,
        /// Generation carried by the event
        observed: i64,
        /// Highest generation already observed
        last_seen: i64,
    },

    /// Removing a resource left over from an older release failed
    #[error("failed to delete obsolete {resource}: {message}")]
    ObsoleteCleanup {
        /// Obsolete resource identity
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Validation error for instance or manifest content
    #[error("validation error for {instance}: {message}")]
    Validation {
        /// Name of the instance or resource with invalid configuration
        instance: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.controllerCustomCerts.type")
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "source")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for an object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for an object
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

    /// Create an unknown-kind error
    pub fn unknown_kind(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::UnknownKind {
            api_version: api_version.into(),
            kind: kind.into(),
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

    /// Create a transform error
    pub fn transform(
        transform: impl Into<String>,
        resource: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transform {
            transform: transform.into(),
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error for a resource
    pub fn apply(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Apply {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a hook error
    pub fn hook(
        extension: impl Into<String>,
        hook: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Hook {
            extension: extension.into(),
            hook: hook.into(),
            message: msg.into(),
        }
    }

    /// Create a stale generation error
    pub fn stale_generation(key: impl Into<String>, observed: i64, last_seen: i64) -> Self {
        Self::StaleGeneration {
            key: key.into(),
            observed,
            last_seen,
        }
    }

    /// Create an obsolete resource cleanup error
    pub fn obsolete_cleanup(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ObsoleteCleanup {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            instance: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with instance context and field path
    pub fn validation_for_field(
        instance: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            instance: instance.into(),
            message: msg.into(),
            field: Some(field.into()),
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

    /// True when the error means the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and transform errors need an instance or
    /// manifest fix. Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::NotFound { .. } => true,
            Error::Conflict { .. } => true,
            Error::UnknownKind { .. } => true,
            Error::Serialization { .. } => false,
            Error::Transform { .. } => false,
            Error::Apply { .. } => true,
            Error::Hook { .. } => true,
            Error::StaleGeneration { .. } => true,
            Error::ObsoleteCleanup { .. } => true,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
