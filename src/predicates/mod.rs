//! Change-filter predicates
//!
//! Every mutating call through the tracing client rewrites the trace markers,
//! which alone would re-trigger the watch that caused the call.
//! [`IgnoreTraceAnnotationUpdate`] drops update events whose only differences
//! are those markers and the store's version bookkeeping.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::{SPAN_ID_ANNOTATION, SPAN_ID_CONDITION, TRACE_ID_ANNOTATION, TRACE_ID_CONDITION};
use crate::event::{CreateEvent, DeleteEvent, GenericEvent, UpdateEvent};
use crate::object::Object;

/// Filter deciding which watch events reach the reconcile queue.
///
/// Every callback forwards by default.
pub trait Predicate<T> {
    fn create(&self, _event: &CreateEvent<T>) -> bool {
        true
    }

    fn update(&self, _event: &UpdateEvent<T>) -> bool {
        true
    }

    fn delete(&self, _event: &DeleteEvent<T>) -> bool {
        true
    }

    fn generic(&self, _event: &GenericEvent<T>) -> bool {
        true
    }
}

/// Suppresses updates that only touched trace markers or version counters
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreTraceAnnotationUpdate;

/// Top-level fields that are never part of the compared payload
const NON_PAYLOAD_FIELDS: [&str; 4] = ["metadata", "status", "apiVersion", "kind"];

impl IgnoreTraceAnnotationUpdate {
    pub fn new() -> Self {
        Self
    }

    /// Whether an update from `old` to `new` should be forwarded.
    ///
    /// A missing side always forwards.
    pub fn should_forward<T: Object>(&self, old: Option<&T>, new: Option<&T>) -> bool {
        let (Some(old), Some(new)) = (old, new) else {
            return true;
        };

        let trace_changed = old.annotation(TRACE_ID_ANNOTATION) != new.annotation(TRACE_ID_ANNOTATION);
        let span_changed = old.annotation(SPAN_ID_ANNOTATION) != new.annotation(SPAN_ID_ANNOTATION);
        let version_changed = old.resource_version() != new.resource_version()
            || old.meta().generation != new.meta().generation;
        let other_annotations_changed = !equal_except(
            old.annotations(),
            new.annotations(),
            &[TRACE_ID_ANNOTATION, SPAN_ID_ANNOTATION],
        );

        let (old_doc, new_doc) = match (serde_json::to_value(old), serde_json::to_value(new)) {
            (Ok(old_doc), Ok(new_doc)) => (old_doc, new_doc),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cannot compare update event, forwarding it");
                return true;
            }
        };
        let spec_changed = payload(&old_doc) != payload(&new_doc);
        let status_changed = status(&old_doc) != status(&new_doc);

        if other_annotations_changed || spec_changed || status_changed {
            return true;
        }

        debug!(
            key = %new.key(),
            trace_changed,
            span_changed,
            version_changed,
            "Suppressing update without business-relevant changes"
        );
        false
    }
}

impl<T: Object> Predicate<T> for IgnoreTraceAnnotationUpdate {
    fn update(&self, event: &UpdateEvent<T>) -> bool {
        self.should_forward(event.object_old.as_ref(), event.object_new.as_ref())
    }
}

/// Compare two annotation maps, ignoring `ignored` keys. A missing map equals
/// an empty one.
fn equal_except(
    a: Option<&BTreeMap<String, String>>,
    b: Option<&BTreeMap<String, String>>,
    ignored: &[&str],
) -> bool {
    let empty = BTreeMap::new();
    let strip = |map: Option<&BTreeMap<String, String>>| -> Vec<(String, String)> {
        map.unwrap_or(&empty)
            .iter()
            .filter(|(k, _)| !ignored.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    strip(a) == strip(b)
}

/// Everything outside metadata and status: `spec` for most kinds, `data`
/// for config-style kinds
fn payload(document: &Value) -> Option<Value> {
    let Value::Object(fields) = document else {
        return None;
    };
    let payload: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| !NON_PAYLOAD_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    normalize(&Value::Object(payload))
}

/// Status without version bookkeeping and trace marker conditions
fn status(document: &Value) -> Option<Value> {
    let mut status = document.get("status")?.clone();
    if let Value::Object(fields) = &mut status {
        fields.remove("observedGeneration");
        if let Some(Value::Array(conditions)) = fields.get_mut("conditions") {
            conditions.retain(|c| {
                let kind = c.get("type").and_then(Value::as_str);
                kind != Some(TRACE_ID_CONDITION) && kind != Some(SPAN_ID_CONDITION)
            });
        }
    }
    normalize(&status)
}

/// Collapse `null`, `{}` and `[]` (recursively) to absent
fn normalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(fields) => {
            let fields: Map<String, Value> = fields
                .iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k.clone(), v)))
                .collect();
            (!fields.is_empty()).then_some(Value::Object(fields))
        }
        Value::Array(items) => {
            let items: Vec<Value> = items
                .iter()
                .map(|item| normalize(item).unwrap_or(Value::Null))
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ConfigMap, Container, Pod};
    use crate::object::Condition;
    use serde_json::json;

    fn pod_with(annotations: &[(&str, &str)], resource_version: &str) -> Pod {
        let mut pod = Pod::new("default", "p");
        pod.metadata.resource_version = Some(resource_version.to_string());
        for (k, v) in annotations {
            pod.annotations_mut().insert(k.to_string(), v.to_string());
        }
        pod
    }

    #[test]
    fn test_marker_and_version_changes_are_suppressed() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let old = pod_with(&[(TRACE_ID_ANNOTATION, "a"), ("x", "1")], "1");
        let new = pod_with(&[(TRACE_ID_ANNOTATION, "b"), ("x", "1")], "2");

        assert!(!predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_other_annotation_change_forwards() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let old = pod_with(&[(TRACE_ID_ANNOTATION, "a"), ("x", "1")], "1");
        let new = pod_with(&[(TRACE_ID_ANNOTATION, "b"), ("x", "2")], "2");

        assert!(predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_spec_change_forwards() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let mut old = pod_with(&[], "1");
        let mut new = pod_with(&[], "2");
        old.spec.containers = vec![Container {
            name: "nginx".to_string(),
            image: "nginx:1.14.2".to_string(),
        }];
        new.spec.containers = vec![Container {
            name: "nginx".to_string(),
            image: "nginx:1.15.0".to_string(),
        }];

        assert!(predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_status_change_forwards() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let mut old = pod_with(&[], "1");
        let mut new = pod_with(&[], "2");
        old.status.phase = "Pending".to_string();
        new.status.phase = "Running".to_string();

        assert!(predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_marker_conditions_are_ignored() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let old = pod_with(&[], "1");
        let mut new = pod_with(&[], "2");
        let mut trace = Condition::new(TRACE_ID_CONDITION, "True");
        trace.message = "abc".to_string();
        new.status.conditions = vec![trace, Condition::new(SPAN_ID_CONDITION, "True")];

        assert!(!predicate.should_forward(Some(&old), Some(&new)));

        new.status.conditions.push(Condition::new("Ready", "True"));
        assert!(predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_config_data_change_forwards() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let old = ConfigMap::new("default", "cm");
        let mut new = old.clone();
        new.data.insert("k".to_string(), "v".to_string());

        assert!(predicate.should_forward(Some(&old), Some(&new)));
    }

    #[test]
    fn test_missing_side_forwards() {
        let predicate = IgnoreTraceAnnotationUpdate::new();
        let pod = pod_with(&[], "1");
        assert!(predicate.should_forward(None, Some(&pod)));
        assert!(predicate.should_forward(Some(&pod), None));
        assert!(Predicate::<Pod>::update(
            &predicate,
            &UpdateEvent {
                object_old: None,
                object_new: Some(pod.clone()),
            }
        ));
        assert!(Predicate::create(&predicate, &CreateEvent::new(pod)));
    }

    #[test]
    fn test_normalize_collapses_empty_structures() {
        assert_eq!(normalize(&json!({"a": {}, "b": [], "c": null})), None);
        assert_eq!(
            normalize(&json!({"a": {"b": {}}, "c": 1})),
            Some(json!({"c": 1}))
        );
        assert_eq!(
            status(&json!({"status": {"observedGeneration": 3}})),
            None
        );
    }
}
