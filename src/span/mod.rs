//! Span lifecycle
//!
//! [`SpanStarter`] starts the span for one store operation and decides which
//! trace it belongs to. Sources are tried in order:
//!
//! 1. the span already active in the caller's [`Context`]
//! 2. condition-form markers on the supplied object
//! 3. annotation-form markers on the supplied object
//! 4. nothing: a fresh root span
//!
//! A source carrying an unparseable id is logged and skipped. Persisted
//! markers that hold a trace id but no span id get a synthesized span id so
//! the remote parent is still valid.
//!
//! The returned [`Context`] carries the new span as its active span. Callers
//! end it with `cx.span().end()`.

use std::borrow::Cow;
use std::sync::Arc;

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer,
};
use opentelemetry::{Context, KeyValue};
use tracing::{debug, warn};

use crate::codec::{self, TraceContext};
use crate::object::Object;
use crate::scheme::Scheme;

/// Attribute keys written on every operation span
pub mod attributes {
    pub const OBJECT_KIND: &str = "k8s.object.kind";
    pub const OBJECT_NAME: &str = "k8s.object.name";
    pub const NAMESPACE_NAME: &str = opentelemetry_semantic_conventions::resource::K8S_NAMESPACE_NAME;
    pub const CALLER_KIND: &str = "kubetracer.caller.kind";
    pub const CALLER_NAME: &str = "kubetracer.caller.name";
}

/// Where the parent of a new span came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSource {
    Ambient,
    Condition,
    Annotation,
    Root,
}

impl ParentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::Condition => "condition",
            Self::Annotation => "annotation",
            Self::Root => "root",
        }
    }
}

/// Starts operation spans with an injected tracer
#[derive(Debug)]
pub struct SpanStarter<T> {
    tracer: T,
    scheme: Arc<Scheme>,
}

impl<T> SpanStarter<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T, scheme: Arc<Scheme>) -> Self {
        Self { tracer, scheme }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Start a span for an operation on `obj`.
    ///
    /// `None` skips the persisted-marker sources, as list calls do.
    pub fn start<O: Object>(
        &self,
        cx: &Context,
        name: impl Into<Cow<'static, str>>,
        obj: Option<&O>,
    ) -> Context {
        let mut attrs = Vec::new();
        if let Some(obj) = obj {
            if let Ok(gvk) = self.scheme.kind_of::<O>() {
                attrs.push(KeyValue::new(attributes::OBJECT_KIND, gvk.kind.clone()));
            }
            attrs.push(KeyValue::new(attributes::OBJECT_NAME, obj.name().to_string()));
            if !obj.namespace().is_empty() {
                attrs.push(KeyValue::new(
                    attributes::NAMESPACE_NAME,
                    obj.namespace().to_string(),
                ));
            }
        }
        self.begin(cx, name.into(), attrs, || {
            obj.and_then(|obj| self.persisted_parent(obj))
        })
    }

    /// Start a span that can only continue the ambient trace
    pub fn start_without_object(&self, cx: &Context, name: impl Into<Cow<'static, str>>) -> Context {
        self.begin(cx, name.into(), Vec::new(), || None)
    }

    fn begin(
        &self,
        cx: &Context,
        name: Cow<'static, str>,
        attrs: Vec<KeyValue>,
        fallback: impl FnOnce() -> Option<(SpanContext, ParentSource)>,
    ) -> Context {
        let (parent, source) = match ambient_parent(cx) {
            Some(remote) => (cx.with_remote_span_context(remote), ParentSource::Ambient),
            None => match fallback() {
                Some((remote, source)) => (cx.with_remote_span_context(remote), source),
                // the SDK starts a new trace under a context without a valid span
                None => (cx.clone(), ParentSource::Root),
            },
        };

        let span = self
            .tracer
            .span_builder(name)
            .with_attributes(attrs)
            .start_with_context(&self.tracer, &parent);
        let cx = parent.with_span(span);
        debug!(
            trace_id = %cx.span().span_context().trace_id(),
            parent = source.as_str(),
            "Started operation span"
        );
        cx
    }

    /// Condition-form markers first, then annotation-form markers
    fn persisted_parent<O: Object>(&self, obj: &O) -> Option<(SpanContext, ParentSource)> {
        if let Some(trace) = codec::read_conditions(&self.scheme, obj) {
            if let Some(remote) = remote_span_context(&trace, ParentSource::Condition) {
                return Some((remote, ParentSource::Condition));
            }
        }
        if let Some(trace) = codec::read_from_object(obj) {
            if let Some(remote) = remote_span_context(&trace, ParentSource::Annotation) {
                return Some((remote, ParentSource::Annotation));
            }
        }
        None
    }
}

/// Remote copy of the active span in `cx`, when there is a valid one
fn ambient_parent(cx: &Context) -> Option<SpanContext> {
    let active = cx.span().span_context().clone();
    if !active.is_valid() {
        return None;
    }
    Some(SpanContext::new(
        active.trace_id(),
        active.span_id(),
        active.trace_flags(),
        true,
        active.trace_state().clone(),
    ))
}

/// Build a sampled remote parent from persisted markers.
///
/// Returns `None` (after logging) when either id fails to parse or the trace
/// id is all zeros.
pub fn remote_span_context(trace: &TraceContext, source: ParentSource) -> Option<SpanContext> {
    let trace_id = match TraceId::from_hex(&trace.trace_id) {
        Ok(id) if id != TraceId::INVALID => id,
        _ => {
            warn!(
                trace_id = %trace.trace_id,
                source = source.as_str(),
                "Ignoring malformed trace id"
            );
            return None;
        }
    };

    let span_id = if trace.span_id.is_empty() {
        SpanId::from_bytes(fastrand::u64(1..).to_be_bytes())
    } else {
        match SpanId::from_hex(&trace.span_id) {
            Ok(id) if id != SpanId::INVALID => id,
            _ => {
                warn!(
                    span_id = %trace.span_id,
                    source = source.as_str(),
                    "Ignoring malformed span id"
                );
                return None;
            }
        }
    };

    Some(SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    ))
}
