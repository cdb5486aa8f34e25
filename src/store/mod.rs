//! Object-store boundary
//!
//! The tracing client wraps anything implementing [`ObjectStore`]. The trait
//! mirrors the verbs a controller issues against the cluster API: reads,
//! lists, writes of the main resource, and writes of the status subresource.
//!
//! [`memory::MemoryStore`] is the in-process implementation used by tests and
//! examples.

pub mod memory;
pub mod patch;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::object::{Object, ObjectKey, ObjectList};

pub use memory::MemoryStore;

/// Errors returned by an object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} \"{key}\" not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} \"{key}\" already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("Operation cannot be fulfilled on {kind} \"{key}\": {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },

    #[error("{kind} \"{key}\" is invalid: {message}")]
    Invalid {
        kind: String,
        key: String,
        message: String,
    },

    #[error("Operation not supported: {message}")]
    NotSupported { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn conflict(kind: impl Into<String>, key: impl ToString, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(kind: impl Into<String>, key: impl ToString, message: impl Into<String>) -> Self {
        Self::Invalid {
            kind: kind.into(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

/// Partial update sent to [`ObjectStore::patch`] and [`ObjectStore::patch_status`]
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// A literal merge-patch document
    Merge(Value),
    /// Snapshot taken before mutating the object; the patch is the difference
    /// between the snapshot and the object at call time
    MergeFrom(Value),
}

impl Patch {
    /// Record `original` as the base of a merge patch
    pub fn merge_from<T: Object>(original: &T) -> Result<Self, StoreError> {
        Ok(Self::MergeFrom(serde_json::to_value(original)?))
    }

    /// Merge-patch document to apply for the object as it looks now
    pub fn data(&self, modified: &Value) -> Value {
        match self {
            Self::Merge(document) => document.clone(),
            Self::MergeFrom(original) => patch::create_merge_patch(original, modified),
        }
    }
}

/// Filter for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Restrict to one namespace; `None` lists every namespace
    pub namespace: Option<String>,
    /// Every entry must be present with an equal value
    pub labels: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches<T: Object>(&self, obj: &T) -> bool {
        if let Some(namespace) = &self.namespace {
            if obj.namespace() != namespace {
                return false;
            }
        }
        let labels = obj.meta().labels.as_ref();
        self.labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Filter for delete-all-of calls
pub type DeleteAllOfOptions = ListOptions;

/// Async object store.
///
/// Writes take the object mutably and refresh it with the stored state
/// (concurrency token, uid, generation) on success.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<T: Object>(&self, key: &ObjectKey) -> Result<T, StoreError>;

    async fn list<T: Object>(&self, opts: &ListOptions) -> Result<ObjectList<T>, StoreError>;

    async fn create<T: Object>(&self, obj: &mut T) -> Result<(), StoreError>;

    async fn update<T: Object>(&self, obj: &mut T) -> Result<(), StoreError>;

    async fn patch<T: Object>(&self, obj: &mut T, patch: &Patch) -> Result<(), StoreError>;

    async fn delete<T: Object>(&self, obj: &T) -> Result<(), StoreError>;

    async fn delete_all_of<T: Object>(&self, opts: &DeleteAllOfOptions) -> Result<(), StoreError>;

    async fn create_status<T: Object>(&self, obj: &mut T) -> Result<(), StoreError>;

    async fn update_status<T: Object>(&self, obj: &mut T) -> Result<(), StoreError>;

    async fn patch_status<T: Object>(&self, obj: &mut T, patch: &Patch) -> Result<(), StoreError>;
}
