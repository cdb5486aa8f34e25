//! In-process object store
//!
//! Objects are kept as JSON documents in one bucket per Rust type. Every
//! successful write bumps a store-wide revision that becomes the object's
//! `resourceVersion`. Clones share the same state, so several clients can
//! observe each other's writes.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::patch::apply_merge_patch;
use super::{DeleteAllOfOptions, ListOptions, ObjectStore, Patch, StoreError};
use crate::constants::RESOURCE_VERSION_KEY;
use crate::object::{Object, ObjectKey, ObjectList};

const CONFLICT_MESSAGE: &str =
    "the object has been modified; please apply your changes to the latest version and try again";

type Bucket = BTreeMap<ObjectKey, Value>;

#[derive(Default)]
struct State {
    buckets: HashMap<TypeId, Bucket>,
    revision: u64,
}

impl State {
    fn next_revision(revision: &mut u64) -> String {
        *revision += 1;
        revision.to_string()
    }
}

/// Shared in-memory [`ObjectStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    status_types: Arc<HashSet<TypeId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `status` of `T` as a subresource: main-resource writes keep the
    /// stored status and status writes change nothing else.
    pub fn with_status_subresource<T: Object>(mut self) -> Self {
        Arc::make_mut(&mut self.status_types).insert(TypeId::of::<T>());
        self
    }

    fn has_status_subresource<T: Object>(&self) -> bool {
        self.status_types.contains(&TypeId::of::<T>())
    }

    /// Number of objects of type `T`
    pub async fn len<T: Object>(&self) -> usize {
        self.state
            .read()
            .await
            .buckets
            .get(&TypeId::of::<T>())
            .map_or(0, BTreeMap::len)
    }
}

fn kind_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn to_document<T: Object>(obj: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(obj)?)
}

fn from_document<T: Object>(document: &Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(document.clone())?)
}

fn metadata_field<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    document.get("metadata").and_then(|m| m.get(field))
}

fn set_metadata_field(document: &mut Value, field: &str, value: Value) {
    if let Some(Value::Object(meta)) = document.get_mut("metadata") {
        meta.insert(field.to_string(), value);
    }
}

/// Copy `field` from `from` into `to`, removing it from `to` when absent
fn carry_field(from: &Value, to: &mut Value, field: &str) {
    let Value::Object(target) = to else {
        return;
    };
    match from.get(field) {
        Some(value) => {
            target.insert(field.to_string(), value.clone());
        }
        None => {
            target.remove(field);
        }
    }
}

/// Keep store-owned metadata from `stored` and bump the generation when the
/// spec changed
fn carry_identity(stored: &Value, document: &mut Value) {
    for field in ["name", "namespace", "uid"] {
        if let Some(value) = metadata_field(stored, field).cloned() {
            set_metadata_field(document, field, value);
        }
    }
    let generation = metadata_field(stored, "generation")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let generation = if stored.get("spec") != document.get("spec") {
        generation + 1
    } else {
        generation
    };
    set_metadata_field(document, "generation", Value::from(generation));
}

fn check_resource_version<T: Object>(
    obj: &T,
    stored: &Value,
    key: &ObjectKey,
) -> Result<(), StoreError> {
    let Some(incoming) = obj.resource_version().filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let current = metadata_field(stored, RESOURCE_VERSION_KEY).and_then(Value::as_str);
    if current != Some(incoming) {
        return Err(StoreError::conflict(kind_name::<T>(), key, CONFLICT_MESSAGE));
    }
    Ok(())
}

fn stored_mut<'a, T: Object>(
    buckets: &'a mut HashMap<TypeId, Bucket>,
    key: &ObjectKey,
) -> Result<&'a mut Value, StoreError> {
    buckets
        .get_mut(&TypeId::of::<T>())
        .and_then(|bucket| bucket.get_mut(key))
        .ok_or_else(|| StoreError::not_found(kind_name::<T>(), key))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<T: Object>(&self, key: &ObjectKey) -> Result<T, StoreError> {
        let state = self.state.read().await;
        let document = state
            .buckets
            .get(&TypeId::of::<T>())
            .and_then(|bucket| bucket.get(key))
            .ok_or_else(|| StoreError::not_found(kind_name::<T>(), key))?;
        from_document(document)
    }

    async fn list<T: Object>(&self, opts: &ListOptions) -> Result<ObjectList<T>, StoreError> {
        let state = self.state.read().await;
        let mut items = Vec::new();
        if let Some(bucket) = state.buckets.get(&TypeId::of::<T>()) {
            for document in bucket.values() {
                let obj: T = from_document(document)?;
                if opts.matches(&obj) {
                    items.push(obj);
                }
            }
        }
        Ok(ObjectList {
            items,
            resource_version: Some(state.revision.to_string()),
        })
    }

    async fn create<T: Object>(&self, obj: &mut T) -> Result<(), StoreError> {
        let key = obj.key();
        if key.name.is_empty() {
            return Err(StoreError::invalid(
                kind_name::<T>(),
                &key,
                "metadata.name: Required value",
            ));
        }
        let mut document = to_document(obj)?;

        let mut guard = self.state.write().await;
        let State { buckets, revision } = &mut *guard;
        let bucket = buckets.entry(TypeId::of::<T>()).or_default();
        if bucket.contains_key(&key) {
            return Err(StoreError::already_exists(kind_name::<T>(), &key));
        }

        set_metadata_field(&mut document, "uid", Value::from(Uuid::new_v4().to_string()));
        set_metadata_field(&mut document, "generation", Value::from(1));
        set_metadata_field(
            &mut document,
            RESOURCE_VERSION_KEY,
            Value::from(State::next_revision(revision)),
        );
        *obj = from_document(&document)?;
        bucket.insert(key.clone(), document);
        debug!(kind = kind_name::<T>(), key = %key, "Created object");
        Ok(())
    }

    async fn update<T: Object>(&self, obj: &mut T) -> Result<(), StoreError> {
        let key = obj.key();
        let mut document = to_document(obj)?;
        let status_subresource = self.has_status_subresource::<T>();

        let mut guard = self.state.write().await;
        let State { buckets, revision } = &mut *guard;
        let stored = stored_mut::<T>(buckets, &key)?;
        check_resource_version(obj, stored, &key)?;

        if status_subresource {
            carry_field(stored, &mut document, "status");
        }
        carry_identity(stored, &mut document);
        set_metadata_field(
            &mut document,
            RESOURCE_VERSION_KEY,
            Value::from(State::next_revision(revision)),
        );
        *obj = from_document(&document)?;
        *stored = document;
        Ok(())
    }

    async fn patch<T: Object>(&self, obj: &mut T, patch: &Patch) -> Result<(), StoreError> {
        let key = obj.key();
        let data = patch.data(&to_document(obj)?);
        let status_subresource = self.has_status_subresource::<T>();

        let mut guard = self.state.write().await;
        let State { buckets, revision } = &mut *guard;
        let stored = stored_mut::<T>(buckets, &key)?;

        let mut document = stored.clone();
        apply_merge_patch(&mut document, &data);
        if status_subresource {
            carry_field(stored, &mut document, "status");
        }
        carry_identity(stored, &mut document);
        set_metadata_field(
            &mut document,
            RESOURCE_VERSION_KEY,
            Value::from(State::next_revision(revision)),
        );
        *obj = from_document(&document)?;
        *stored = document;
        Ok(())
    }

    async fn delete<T: Object>(&self, obj: &T) -> Result<(), StoreError> {
        let key = obj.key();
        let mut state = self.state.write().await;
        state
            .buckets
            .get_mut(&TypeId::of::<T>())
            .and_then(|bucket| bucket.remove(&key))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(kind_name::<T>(), &key))
    }

    async fn delete_all_of<T: Object>(&self, opts: &DeleteAllOfOptions) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(bucket) = state.buckets.get_mut(&TypeId::of::<T>()) else {
            return Ok(());
        };
        let mut doomed = Vec::new();
        for (key, document) in bucket.iter() {
            let obj: T = from_document(document)?;
            if opts.matches(&obj) {
                doomed.push(key.clone());
            }
        }
        for key in &doomed {
            bucket.remove(key);
        }
        debug!(kind = kind_name::<T>(), count = doomed.len(), "Deleted objects");
        Ok(())
    }

    async fn create_status<T: Object>(&self, _obj: &mut T) -> Result<(), StoreError> {
        Err(StoreError::not_supported(format!(
            "status create is not supported for {}",
            kind_name::<T>()
        )))
    }

    async fn update_status<T: Object>(&self, obj: &mut T) -> Result<(), StoreError> {
        let key = obj.key();
        let modified = to_document(obj)?;

        let mut guard = self.state.write().await;
        let State { buckets, revision } = &mut *guard;
        let stored = stored_mut::<T>(buckets, &key)?;
        check_resource_version(obj, stored, &key)?;

        let mut document = stored.clone();
        carry_field(&modified, &mut document, "status");
        set_metadata_field(
            &mut document,
            RESOURCE_VERSION_KEY,
            Value::from(State::next_revision(revision)),
        );
        *obj = from_document(&document)?;
        *stored = document;
        Ok(())
    }

    async fn patch_status<T: Object>(&self, obj: &mut T, patch: &Patch) -> Result<(), StoreError> {
        let key = obj.key();
        let data = patch.data(&to_document(obj)?);

        let mut guard = self.state.write().await;
        let State { buckets, revision } = &mut *guard;
        let stored = stored_mut::<T>(buckets, &key)?;

        let mut document = stored.clone();
        if let (Some(status_patch), Value::Object(fields)) = (data.get("status"), &mut document) {
            let status = fields
                .entry("status".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            apply_merge_patch(status, status_patch);
        }
        set_metadata_field(
            &mut document,
            RESOURCE_VERSION_KEY,
            Value::from(State::next_revision(revision)),
        );
        *obj = from_document(&document)?;
        *stored = document;
        Ok(())
    }
}
