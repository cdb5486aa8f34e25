//! Kind registry
//!
//! The [`Scheme`] maps Rust types to their `group/version/kind`, records
//! whether each group-kind is namespaced or cluster-scoped (the REST-mapping
//! question the owner mapper needs), and holds the condition accessor for
//! kinds that embed conditions in their status.
//!
//! A scheme is populated once at startup and shared read-only afterwards,
//! usually behind an `Arc`.
//!
//! ```rust
//! use kubetracer::api::{self, Pod};
//! use kubetracer::scheme::{GroupKind, Scheme, Scope};
//!
//! let mut scheme = Scheme::new();
//! api::add_to_scheme(&mut scheme);
//!
//! assert_eq!(scheme.kind_of::<Pod>().unwrap().kind, "Pod");
//! assert_eq!(
//!     scheme.rest_mapping(&GroupKind::new("", "Pod"), "v1"),
//!     Some(Scope::Namespaced)
//! );
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::error::KubetracerError;
use crate::object::{Condition, HasConditions, Object};

/// Group + kind, the identity owner references are matched on
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

/// Fully qualified kind of a registered type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }

    /// `apiVersion` as written in owner references
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Split an `apiVersion` into group and version.
///
/// An empty string is the empty group/version and a single segment is a
/// version in the core group. Returns `None` for more than one `/`.
pub fn parse_group_version(api_version: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = api_version.split('/').collect();
    match parts.as_slice() {
        [version] => Some((String::new(), version.to_string())),
        [group, version] => Some((group.to_string(), version.to_string())),
        _ => None,
    }
}

/// REST scope of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

type ReadConditions = fn(&dyn Any) -> Option<Vec<Condition>>;
type WriteConditions = fn(&mut dyn Any, Vec<Condition>) -> bool;

#[derive(Clone, Copy)]
struct ConditionAccessor {
    read: ReadConditions,
    write: WriteConditions,
}

fn read_conditions<T: HasConditions + 'static>(obj: &dyn Any) -> Option<Vec<Condition>> {
    obj.downcast_ref::<T>().map(HasConditions::conditions)
}

fn write_conditions<T: HasConditions + 'static>(obj: &mut dyn Any, conditions: Vec<Condition>) -> bool {
    match obj.downcast_mut::<T>() {
        Some(typed) => {
            typed.set_conditions(conditions);
            true
        }
        None => false,
    }
}

#[derive(Clone)]
struct KindEntry {
    gvk: GroupVersionKind,
    conditions: Option<ConditionAccessor>,
}

/// Registry of kinds known to this process
#[derive(Clone, Default)]
pub struct Scheme {
    kinds: HashMap<TypeId, KindEntry>,
    scopes: HashMap<GroupKind, Scope>,
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.kinds.values().map(|e| e.gvk.to_string()).collect();
        kinds.sort();
        f.debug_struct("Scheme").field("kinds", &kinds).finish()
    }
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its group/version/kind
    pub fn register<T: Object>(&mut self, gvk: GroupVersionKind, scope: Scope) -> &mut Self {
        self.insert(TypeId::of::<T>(), gvk, scope, None);
        self
    }

    /// Register a type whose status exposes conditions
    pub fn register_with_conditions<T: Object + HasConditions>(
        &mut self,
        gvk: GroupVersionKind,
        scope: Scope,
    ) -> &mut Self {
        let accessor = ConditionAccessor {
            read: read_conditions::<T>,
            write: write_conditions::<T>,
        };
        self.insert(TypeId::of::<T>(), gvk, scope, Some(accessor));
        self
    }

    /// Record the scope of a group-kind without a local Rust type (e.g. an owner
    /// kind only ever seen through owner references)
    pub fn register_scope(&mut self, group_kind: GroupKind, scope: Scope) -> &mut Self {
        self.scopes.insert(group_kind, scope);
        self
    }

    fn insert(
        &mut self,
        type_id: TypeId,
        gvk: GroupVersionKind,
        scope: Scope,
        conditions: Option<ConditionAccessor>,
    ) {
        self.scopes.insert(gvk.group_kind(), scope);
        self.kinds.insert(type_id, KindEntry { gvk, conditions });
    }

    /// Kind of a registered type
    pub fn kind_of<T: Object>(&self) -> Result<&GroupVersionKind, KubetracerError> {
        self.kinds
            .get(&TypeId::of::<T>())
            .map(|entry| &entry.gvk)
            .ok_or_else(|| KubetracerError::unregistered_kind(std::any::type_name::<T>()))
    }

    /// Scope of a group-kind; `version` is accepted for parity with REST mappers
    /// but a kind has a single scope here
    pub fn rest_mapping(&self, group_kind: &GroupKind, _version: &str) -> Option<Scope> {
        self.scopes.get(group_kind).copied()
    }

    pub fn supports_conditions<T: Object>(&self) -> bool {
        self.kinds
            .get(&TypeId::of::<T>())
            .is_some_and(|entry| entry.conditions.is_some())
    }

    /// Conditions of `obj`, or `None` when its kind has no condition accessor
    pub fn conditions<T: Object>(&self, obj: &T) -> Option<Vec<Condition>> {
        let accessor = self.kinds.get(&TypeId::of::<T>())?.conditions?;
        (accessor.read)(obj as &dyn Any)
    }

    /// Replace the conditions of `obj`; returns false when unsupported
    pub fn set_conditions<T: Object>(&self, obj: &mut T, conditions: Vec<Condition>) -> bool {
        match self
            .kinds
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.conditions)
        {
            Some(accessor) => (accessor.write)(obj as &mut dyn Any, conditions),
            None => false,
        }
    }
}
