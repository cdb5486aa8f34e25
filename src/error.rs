//! Error handling for the kubetracer library
//!
//! The tracing client fails in only two ways:
//!
//! - **Store errors** - whatever the underlying object store returned, passed
//!   through unchanged (and recorded on the active span)
//! - **Kind resolution errors** - the object's type is not registered in the
//!   [`Scheme`](crate::scheme::Scheme), so no operation name can be built
//!
//! Telemetry setup adds configuration errors on top.
//!
//! Malformed trace identifiers and teardown conflicts are not errors: they are
//! logged and the layer falls back to the next source of trace context.
//!
//! # Quick Start
//!
//! ```rust
//! use kubetracer::error::{ignore_not_found, KubetracerError};
//! use kubetracer::store::StoreError;
//!
//! let missing: Result<(), KubetracerError> =
//!     Err(StoreError::not_found("Pod", "default/gone").into());
//! assert!(ignore_not_found(missing).is_ok());
//! ```

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for the kubetracer library
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KubetracerError {
    /// Error returned by the underlying object store, unchanged
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The object's type has not been registered in the scheme
    #[error("Unregistered kind: {type_name} is not registered in the scheme")]
    UnregisteredKind { type_name: String },

    /// The kind does not expose a status condition list
    #[error("Conditions unsupported: kind {kind} has no status conditions")]
    ConditionsUnsupported { kind: String },

    /// Setup problems (tracer provider, subscriber, config)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON conversion errors while inspecting objects
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl KubetracerError {
    pub fn unregistered_kind(type_name: impl Into<String>) -> Self {
        Self::UnregisteredKind {
            type_name: type_name.into(),
        }
    }

    pub fn conditions_unsupported(kind: impl Into<String>) -> Self {
        Self::ConditionsUnsupported { kind: kind.into() }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// The store error carried by this error, if any
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.as_store_error().is_some_and(StoreError::is_not_found)
    }

    pub fn is_conflict(&self) -> bool {
        self.as_store_error().is_some_and(StoreError::is_conflict)
    }
}

impl From<crate::config::ConfigError> for KubetracerError {
    fn from(error: crate::config::ConfigError) -> Self {
        Self::configuration_error(error.to_string())
    }
}

impl From<serde_json::Error> for KubetracerError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization_error(error.to_string())
    }
}

/// Convert a not-found store error into success, keeping every other error
pub fn ignore_not_found<T: Default>(result: crate::Result<T>) -> crate::Result<T> {
    match result {
        Err(e) if e.is_not_found() => Ok(T::default()),
        other => other,
    }
}
