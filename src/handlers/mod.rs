//! Owner-event mapping
//!
//! [`EnqueueRequestForOwner`] turns events on a child object into reconcile
//! requests for its owners. When the child carries trace markers the request
//! name is encoded (see [`codec::encode`]) so the owner's reconcile resumes
//! the child's trace through
//! [`TracingClient::start_trace`](crate::client::TracingClient::start_trace).
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kubetracer::api::{self, ConfigMap, Pod};
//! use kubetracer::event::CreateEvent;
//! use kubetracer::handlers::EnqueueRequestForOwner;
//! use kubetracer::object::OwnerReference;
//! use kubetracer::scheme::Scheme;
//!
//! let mut scheme = Scheme::new();
//! api::add_to_scheme(&mut scheme);
//! let handler = EnqueueRequestForOwner::new::<Pod>(Arc::new(scheme)).unwrap();
//!
//! let mut cm = ConfigMap::new("default", "child");
//! cm.metadata.owner_references.push(OwnerReference {
//!     api_version: "v1".to_string(),
//!     kind: "Pod".to_string(),
//!     name: "owner".to_string(),
//!     ..Default::default()
//! });
//!
//! let mut queued = Vec::new();
//! handler.create(&CreateEvent::new(cm), &mut |req| queued.push(req));
//! assert_eq!(queued[0].key.name, "owner");
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{self, TraceContext};
use crate::constants::{EVENT_KIND_NEW, EVENT_KIND_OLD};
use crate::event::{CreateEvent, DeleteEvent, GenericEvent, UpdateEvent};
use crate::object::{Object, ObjectKey, OwnerReference};
use crate::scheme::{parse_group_version, GroupKind, Scheme, Scope};
use crate::Result;

/// Reconcile request delivered to the work queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Request {
    pub key: ObjectKey,
}

impl Request {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: ObjectKey::new(namespace, name),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

/// One owner re-enqueue before it is lowered to a [`Request`].
///
/// Two records are the same only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRecord {
    /// Owner key with the plain owner name
    pub target: ObjectKey,
    /// Child markers; both empty unless the child carried both ids
    pub trace: TraceContext,
    pub sender_kind: String,
    pub sender_name: String,
    pub event_kind: &'static str,
}

impl OwnerRecord {
    /// Encoded key when the record carries a trace, else the plain owner key
    pub fn to_request(&self) -> Request {
        let key = if self.trace.is_empty() {
            self.target.clone()
        } else {
            codec::encode(&self.trace, &self.target, &self.sender_kind, &self.sender_name)
        };
        Request { key }
    }
}

/// Enqueues requests for the owners of the event's object
#[derive(Debug, Clone)]
pub struct EnqueueRequestForOwner {
    owner: GroupKind,
    is_controller: bool,
    scheme: Arc<Scheme>,
}

impl EnqueueRequestForOwner {
    /// Map events to owners of type `Owner`, which must be registered in
    /// `scheme`
    pub fn new<Owner: Object>(scheme: Arc<Scheme>) -> Result<Self> {
        let owner = scheme.kind_of::<Owner>()?.group_kind();
        Ok(Self::for_group_kind(scheme, owner))
    }

    /// Map events to owners of a group-kind without a local Rust type
    pub fn for_group_kind(scheme: Arc<Scheme>, owner: GroupKind) -> Self {
        Self {
            owner,
            is_controller: false,
            scheme,
        }
    }

    /// Only follow the owner reference flagged as controller
    pub fn only_controller_owner(mut self) -> Self {
        self.is_controller = true;
        self
    }

    pub fn create<C: Object>(&self, event: &CreateEvent<C>, enqueue: &mut dyn FnMut(Request)) {
        let mut records = HashSet::new();
        self.collect(event.object.as_ref(), EVENT_KIND_NEW, &mut records);
        Self::emit(records, enqueue);
    }

    pub fn update<C: Object>(&self, event: &UpdateEvent<C>, enqueue: &mut dyn FnMut(Request)) {
        let mut records = HashSet::new();
        self.collect(event.object_old.as_ref(), EVENT_KIND_OLD, &mut records);
        self.collect(event.object_new.as_ref(), EVENT_KIND_NEW, &mut records);
        Self::emit(records, enqueue);
    }

    pub fn delete<C: Object>(&self, event: &DeleteEvent<C>, enqueue: &mut dyn FnMut(Request)) {
        let mut records = HashSet::new();
        self.collect(event.object.as_ref(), EVENT_KIND_NEW, &mut records);
        Self::emit(records, enqueue);
    }

    pub fn generic<C: Object>(&self, event: &GenericEvent<C>, enqueue: &mut dyn FnMut(Request)) {
        let mut records = HashSet::new();
        self.collect(event.object.as_ref(), EVENT_KIND_NEW, &mut records);
        Self::emit(records, enqueue);
    }

    /// Owner records for one state of a child object
    pub fn owner_records<C: Object>(&self, obj: &C, event_kind: &'static str) -> HashSet<OwnerRecord> {
        let mut records = HashSet::new();
        self.collect(Some(obj), event_kind, &mut records);
        records
    }

    fn emit(records: HashSet<OwnerRecord>, enqueue: &mut dyn FnMut(Request)) {
        // TODO: collapse records that lower to the same owner name, keeping the
        // "new" event kind, once the preferred rule is settled
        let requests: BTreeSet<Request> = records.iter().map(OwnerRecord::to_request).collect();
        for request in requests {
            enqueue(request);
        }
    }

    fn owner_references<'a, C: Object>(&self, obj: &'a C) -> Vec<&'a OwnerReference> {
        if self.is_controller {
            obj.meta().controller_of().into_iter().collect()
        } else {
            obj.owner_references().iter().collect()
        }
    }

    /// Markers travel only when both ids are present
    fn child_trace<C: Object>(obj: &C) -> TraceContext {
        match codec::read_from_object(obj) {
            Some(trace) if !trace.is_empty() => trace,
            _ => TraceContext::default(),
        }
    }

    fn collect<C: Object>(
        &self,
        obj: Option<&C>,
        event_kind: &'static str,
        records: &mut HashSet<OwnerRecord>,
    ) {
        let Some(obj) = obj else {
            return;
        };

        for owner_ref in self.owner_references(obj) {
            let Some((group, version)) = parse_group_version(&owner_ref.api_version) else {
                debug!(
                    api_version = %owner_ref.api_version,
                    "Could not parse owner reference apiVersion"
                );
                return;
            };

            let sender_kind = match self.scheme.kind_of::<C>() {
                Ok(gvk) => gvk.kind.clone(),
                Err(e) => {
                    debug!(error = %e, key = %obj.key(), "Could not resolve kind of child object");
                    return;
                }
            };

            if owner_ref.kind != self.owner.kind || group != self.owner.group {
                continue;
            }

            let namespace = match self.scheme.rest_mapping(&self.owner, &version) {
                Some(Scope::Cluster) => String::new(),
                Some(Scope::Namespaced) => obj.namespace().to_string(),
                None => {
                    debug!(
                        group = %self.owner.group,
                        kind = %self.owner.kind,
                        "Could not retrieve REST mapping for owner kind"
                    );
                    return;
                }
            };

            records.insert(OwnerRecord {
                target: ObjectKey::new(namespace, owner_ref.name.clone()),
                trace: Self::child_trace(obj),
                sender_kind,
                sender_name: obj.name().to_string(),
                event_kind,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, ConfigMap, Pod, Secret};
    use crate::constants::{SPAN_ID_ANNOTATION, TRACE_ID_ANNOTATION};
    use crate::scheme::GroupVersionKind;

    const TRACE: &str = "f620f5cad0af940c294f980c5366a6a1";
    const SPAN: &str = "45f359cdc1c8ab06";

    fn scheme() -> Arc<Scheme> {
        let mut scheme = Scheme::new();
        api::add_to_scheme(&mut scheme);
        scheme.register_scope(GroupKind::new("", "Node"), Scope::Cluster);
        Arc::new(scheme)
    }

    fn owner_ref(api_version: &str, kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: None,
            controller: Some(controller),
        }
    }

    fn child(owners: Vec<OwnerReference>) -> ConfigMap {
        let mut cm = ConfigMap::new("default", "child");
        cm.metadata.owner_references = owners;
        cm
    }

    fn traced(mut cm: ConfigMap) -> ConfigMap {
        cm.annotations_mut().insert(TRACE_ID_ANNOTATION.to_string(), TRACE.to_string());
        cm.annotations_mut().insert(SPAN_ID_ANNOTATION.to_string(), SPAN.to_string());
        cm
    }

    fn collect_create(handler: &EnqueueRequestForOwner, cm: ConfigMap) -> Vec<Request> {
        let mut queued = Vec::new();
        handler.create(&CreateEvent::new(cm), &mut |req| queued.push(req));
        queued
    }

    #[test]
    fn test_unregistered_owner_kind_is_an_error() {
        let scheme = Arc::new(Scheme::new());
        assert!(EnqueueRequestForOwner::new::<Pod>(scheme).is_err());
    }

    #[test]
    fn test_plain_request_without_markers() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let queued = collect_create(&handler, child(vec![owner_ref("v1", "Pod", "owner", false)]));
        assert_eq!(queued, vec![Request::new("default", "owner")]);
    }

    #[test]
    fn test_traced_child_encodes_request() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let queued = collect_create(
            &handler,
            traced(child(vec![owner_ref("v1", "Pod", "owner", false)])),
        );
        assert_eq!(
            queued,
            vec![Request::new(
                "default",
                format!("{};{};ConfigMap;child;owner", TRACE, SPAN)
            )]
        );

        let decoded = codec::decode(&queued[0].key);
        assert!(decoded.ok);
        assert_eq!(decoded.key, ObjectKey::new("default", "owner"));
    }

    #[test]
    fn test_trace_without_span_is_not_forwarded() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let mut cm = child(vec![owner_ref("v1", "Pod", "owner", false)]);
        cm.annotations_mut().insert(TRACE_ID_ANNOTATION.to_string(), TRACE.to_string());

        assert_eq!(collect_create(&handler, cm), vec![Request::new("default", "owner")]);
    }

    #[test]
    fn test_non_matching_owners_are_skipped() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let cm = child(vec![
            owner_ref("v1", "Secret", "s", false),
            owner_ref("apps/v1", "Pod", "other-group", false),
            owner_ref("v1", "Pod", "owner", false),
        ]);
        assert_eq!(collect_create(&handler, cm), vec![Request::new("default", "owner")]);
    }

    #[test]
    fn test_only_controller_owner() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme())
            .unwrap()
            .only_controller_owner();
        let cm = child(vec![
            owner_ref("v1", "Pod", "plain", false),
            owner_ref("v1", "Pod", "controller", true),
        ]);
        assert_eq!(
            collect_create(&handler, cm),
            vec![Request::new("default", "controller")]
        );
    }

    #[test]
    fn test_cluster_scoped_owner_has_no_namespace() {
        let handler = EnqueueRequestForOwner::for_group_kind(scheme(), GroupKind::new("", "Node"));
        let cm = child(vec![owner_ref("v1", "Node", "node-1", false)]);
        assert_eq!(collect_create(&handler, cm), vec![Request::new("", "node-1")]);
    }

    #[test]
    fn test_unparseable_api_version_skips_object() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let cm = child(vec![
            owner_ref("a/b/c", "Pod", "bad", false),
            owner_ref("v1", "Pod", "owner", false),
        ]);
        assert!(collect_create(&handler, cm).is_empty());
    }

    #[test]
    fn test_empty_api_version_resolves_to_core_group() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let cm = child(vec![owner_ref("", "Pod", "owner", false)]);
        assert_eq!(collect_create(&handler, cm), vec![Request::new("default", "owner")]);
    }

    #[test]
    fn test_unregistered_child_kind_is_skipped() {
        let mut scheme = Scheme::new();
        scheme.register::<Pod>(GroupVersionKind::new("", "v1", "Pod"), Scope::Namespaced);
        let handler = EnqueueRequestForOwner::new::<Pod>(Arc::new(scheme)).unwrap();

        let mut secret = Secret::new("default", "s");
        secret.metadata.owner_references = vec![owner_ref("v1", "Pod", "owner", false)];
        let mut queued = Vec::new();
        handler.create(&CreateEvent::new(secret), &mut |req| queued.push(req));
        assert!(queued.is_empty());
    }

    #[test]
    fn test_records_keep_distinct_identities() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let cm = traced(child(vec![
            owner_ref("v1", "Pod", "owner", false),
            owner_ref("v1", "Pod", "owner", true),
        ]));

        // identical owner references collapse, distinct event kinds do not
        let mut records = handler.owner_records(&cm, EVENT_KIND_OLD);
        assert_eq!(records.len(), 1);
        records.extend(handler.owner_records(&cm, EVENT_KIND_NEW));
        assert_eq!(records.len(), 2);

        let mut other_sender = cm.clone();
        other_sender.metadata.name = "sibling".to_string();
        records.extend(handler.owner_records(&other_sender, EVENT_KIND_NEW));
        assert_eq!(records.len(), 3);

        let requests: BTreeSet<Request> = records.iter().map(OwnerRecord::to_request).collect();
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_update_enqueues_old_and_new_owners() {
        let handler = EnqueueRequestForOwner::new::<Pod>(scheme()).unwrap();
        let old = child(vec![owner_ref("v1", "Pod", "before", false)]);
        let new = child(vec![owner_ref("v1", "Pod", "after", false)]);

        let mut queued = Vec::new();
        handler.update(&UpdateEvent::new(old, new), &mut |req| queued.push(req));
        assert_eq!(
            queued,
            vec![Request::new("default", "after"), Request::new("default", "before")]
        );
    }
}
