//! Trace-context codec
//!
//! Converts between an in-memory span context and its two persisted
//! encodings:
//!
//! 1. marker annotations (`kubetracer.io/trace-id`, `kubetracer.io/span-id`),
//!    or the parallel `TraceID` / `SpanID` status conditions for kinds whose
//!    annotations do not survive status-only writes
//! 2. a composite object name `traceId;spanId;callerKind;callerName;realName`
//!    used to hand a trace to a reconcile that has no shared memory with the
//!    producer
//!
//! # Quick Start
//!
//! ```rust
//! use kubetracer::codec::{self, TraceContext};
//! use kubetracer::object::ObjectKey;
//!
//! let trace = TraceContext::new("f620f5cad0af940c294f980c5366a6a1", "45f359cdc1c8ab06");
//! let key = codec::encode(&trace, &ObjectKey::new("default", "cm-1"), "Pod", "pod-a");
//! assert_eq!(key.name, "f620f5cad0af940c294f980c5366a6a1;45f359cdc1c8ab06;Pod;pod-a;cm-1");
//!
//! let decoded = codec::decode(&key);
//! assert!(decoded.ok);
//! assert_eq!(decoded.key.name, "cm-1");
//! assert_eq!(decoded.caller_kind, "Pod");
//! ```

use opentelemetry::trace::SpanContext;

use crate::conditions;
use crate::constants::{
    MARKER_CONDITION_REASON, NAME_SEPARATOR, SPAN_ID_ANNOTATION, SPAN_ID_CONDITION,
    TRACE_ID_ANNOTATION, TRACE_ID_CONDITION,
};
use crate::object::{Object, ObjectKey};
use crate::scheme::Scheme;
use crate::Result;

/// Trace and span identifiers as lowercase hex strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Render a valid span context; invalid (all-zero) contexts yield `None`
    pub fn from_span_context(span_context: &SpanContext) -> Option<Self> {
        if !span_context.is_valid() {
            return None;
        }
        Some(Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        })
    }

    /// True when either identifier is missing
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty() || self.span_id.is_empty()
    }
}

/// Which persisted form a set of markers was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerForm {
    Annotation,
    Condition,
}

/// Result of [`decode`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedKey {
    /// Key with the real object name (the input key when `ok` is false)
    pub key: ObjectKey,
    pub trace_id: String,
    pub span_id: String,
    pub caller_kind: String,
    pub caller_name: String,
    /// True only when the name split into exactly five fields
    pub ok: bool,
}

impl DecodedKey {
    pub fn trace_context(&self) -> Option<TraceContext> {
        self.ok
            .then(|| TraceContext::new(self.trace_id.clone(), self.span_id.clone()))
    }
}

/// Embed `trace` and the caller identity into the name of `key`.
///
/// An empty trace context leaves the key unchanged.
pub fn encode(trace: &TraceContext, key: &ObjectKey, caller_kind: &str, caller_name: &str) -> ObjectKey {
    if trace.is_empty() {
        return key.clone();
    }
    let sep = NAME_SEPARATOR;
    ObjectKey {
        namespace: key.namespace.clone(),
        name: format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            trace.trace_id, trace.span_id, caller_kind, caller_name, key.name
        ),
    }
}

/// Split an encoded key. Any field count other than five is a literal name.
pub fn decode(key: &ObjectKey) -> DecodedKey {
    let fields: Vec<&str> = key.name.split(NAME_SEPARATOR).collect();
    match fields.as_slice() {
        [trace_id, span_id, caller_kind, caller_name, name] => {
            DecodedKey {
                key: ObjectKey::new(key.namespace.clone(), *name),
                trace_id: trace_id.to_string(),
                span_id: span_id.to_string(),
                caller_kind: caller_kind.to_string(),
                caller_name: caller_name.to_string(),
                ok: true,
            }
        }
        _ => DecodedKey {
            key: key.clone(),
            ..DecodedKey::default()
        },
    }
}

/// Write annotation-form markers, creating the annotation map if absent
pub fn stamp_onto_object<T: Object>(obj: &mut T, trace: &TraceContext) {
    let annotations = obj.annotations_mut();
    annotations.insert(TRACE_ID_ANNOTATION.to_string(), trace.trace_id.clone());
    annotations.insert(SPAN_ID_ANNOTATION.to_string(), trace.span_id.clone());
}

/// Annotation-form markers; found when a non-empty trace id is present
pub fn read_from_object<T: Object>(obj: &T) -> Option<TraceContext> {
    let trace_id = obj.annotation(TRACE_ID_ANNOTATION).filter(|v| !v.is_empty())?;
    let span_id = obj.annotation(SPAN_ID_ANNOTATION).unwrap_or_default();
    Some(TraceContext::new(trace_id, span_id))
}

/// Remove annotation-form markers; returns whether anything was removed
pub fn remove_annotation_markers<T: Object>(obj: &mut T) -> bool {
    match obj.meta_mut().annotations.as_mut() {
        Some(annotations) => {
            let trace = annotations.remove(TRACE_ID_ANNOTATION).is_some();
            let span = annotations.remove(SPAN_ID_ANNOTATION).is_some();
            trace || span
        }
        None => false,
    }
}

/// Write condition-form markers
pub fn stamp_conditions<T: Object>(scheme: &Scheme, obj: &mut T, trace: &TraceContext) -> Result<()> {
    conditions::set_condition_message(
        TRACE_ID_CONDITION,
        &trace.trace_id,
        MARKER_CONDITION_REASON,
        obj,
        scheme,
    )?;
    conditions::set_condition_message(
        SPAN_ID_CONDITION,
        &trace.span_id,
        MARKER_CONDITION_REASON,
        obj,
        scheme,
    )
}

/// Condition-form markers; `None` for kinds without conditions or when the
/// trace condition is absent or empty
pub fn read_conditions<T: Object>(scheme: &Scheme, obj: &T) -> Option<TraceContext> {
    let conditions = scheme.conditions(obj)?;
    let message = |condition_type: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == condition_type)
            .map(|c| c.message.clone())
    };
    let trace_id = message(TRACE_ID_CONDITION).filter(|v| !v.is_empty())?;
    let span_id = message(SPAN_ID_CONDITION).unwrap_or_default();
    Some(TraceContext::new(trace_id, span_id))
}

/// Remove condition-form markers; returns whether anything was removed
pub fn remove_condition_markers<T: Object>(scheme: &Scheme, obj: &mut T) -> Result<bool> {
    let Some(before) = scheme.conditions(obj) else {
        return Ok(false);
    };
    let had_markers = before
        .iter()
        .any(|c| c.type_ == TRACE_ID_CONDITION || c.type_ == SPAN_ID_CONDITION);
    if had_markers {
        conditions::delete_condition(TRACE_ID_CONDITION, obj, scheme)?;
        conditions::delete_condition(SPAN_ID_CONDITION, obj, scheme)?;
    }
    Ok(had_markers)
}

/// Markers of `obj`, annotation form first, condition form second
pub fn markers<T: Object>(scheme: &Scheme, obj: &T) -> Option<(TraceContext, MarkerForm)> {
    read_from_object(obj)
        .map(|tc| (tc, MarkerForm::Annotation))
        .or_else(|| read_conditions(scheme, obj).map(|tc| (tc, MarkerForm::Condition)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, ConfigMap, Pod};

    fn scheme() -> Scheme {
        let mut scheme = Scheme::new();
        api::add_to_scheme(&mut scheme);
        scheme
    }

    #[test]
    fn test_decode_recovers_encoded_fields() {
        let trace = TraceContext::new("0af7651916cd43dd8448eb211c80319c", "b7ad6b7169203331");
        let key = ObjectKey::new("default", "test-deployment");

        let decoded = decode(&encode(&trace, &key, "Pod", "test-pod"));

        assert!(decoded.ok);
        assert_eq!(decoded.key, key);
        assert_eq!(decoded.trace_id, trace.trace_id);
        assert_eq!(decoded.span_id, trace.span_id);
        assert_eq!(decoded.caller_kind, "Pod");
        assert_eq!(decoded.caller_name, "test-pod");
        assert_eq!(decoded.trace_context(), Some(trace));
    }

    #[test]
    fn test_decode_plain_name() {
        let key = ObjectKey::new("default", "plain-name");
        let decoded = decode(&key);
        assert!(!decoded.ok);
        assert_eq!(decoded.key, key);
        assert!(decoded.trace_context().is_none());
    }

    #[test]
    fn test_decode_wrong_field_count_is_literal() {
        for name in ["a;b", "a;b;c;d", "a;b;c;d;e;f"] {
            let key = ObjectKey::new("ns", name);
            let decoded = decode(&key);
            assert!(!decoded.ok, "{} should not decode", name);
            assert_eq!(decoded.key.name, name);
        }
    }

    #[test]
    fn test_encode_empty_trace_is_noop() {
        let key = ObjectKey::new("default", "cm");
        assert_eq!(encode(&TraceContext::default(), &key, "Pod", "p"), key);
        assert_eq!(encode(&TraceContext::new("abc", ""), &key, "Pod", "p"), key);
    }

    #[test]
    fn test_stamp_and_read_annotations() {
        let mut cm = ConfigMap::new("default", "cm");
        assert!(read_from_object(&cm).is_none());

        let trace = TraceContext::new("1234", "5678");
        stamp_onto_object(&mut cm, &trace);
        assert_eq!(read_from_object(&cm), Some(trace.clone()));
        assert_eq!(markers(&scheme(), &cm), Some((trace, MarkerForm::Annotation)));

        assert!(remove_annotation_markers(&mut cm));
        assert!(read_from_object(&cm).is_none());
        assert!(!remove_annotation_markers(&mut cm));
    }

    #[test]
    fn test_condition_markers() {
        let scheme = scheme();
        let mut pod = Pod::new("default", "p");
        let trace = TraceContext::new("aaaa", "bbbb");

        stamp_conditions(&scheme, &mut pod, &trace).unwrap();
        assert_eq!(read_conditions(&scheme, &pod), Some(trace.clone()));
        assert_eq!(markers(&scheme, &pod), Some((trace, MarkerForm::Condition)));

        assert!(remove_condition_markers(&scheme, &mut pod).unwrap());
        assert!(read_conditions(&scheme, &pod).is_none());
        assert!(!remove_condition_markers(&scheme, &mut pod).unwrap());
    }

    #[test]
    fn test_condition_markers_unsupported_kind() {
        let scheme = scheme();
        let mut cm = ConfigMap::new("default", "cm");
        assert!(stamp_conditions(&scheme, &mut cm, &TraceContext::new("a", "b")).is_err());
        assert!(read_conditions(&scheme, &cm).is_none());
        assert!(!remove_condition_markers(&scheme, &mut cm).unwrap());
    }
}
