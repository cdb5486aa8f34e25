//! Tracing interceptor
//!
//! [`TracingClient`] wraps an [`ObjectStore`] and gives every store verb a
//! span. Mutating verbs stamp the active trace onto the object before the
//! write, so whatever the store persists names the span that wrote it. The
//! next reconcile, possibly in another process, resumes the trace from those
//! markers.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kubetracer::api::{self, ConfigMap};
//! use kubetracer::client::TracingClient;
//! use kubetracer::object::Object;
//! use kubetracer::scheme::Scheme;
//! use kubetracer::store::MemoryStore;
//! use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
//! use opentelemetry::Context;
//!
//! # async fn run() -> kubetracer::Result<()> {
//! let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
//! let mut scheme = Scheme::new();
//! api::add_to_scheme(&mut scheme);
//!
//! let client = TracingClient::new(MemoryStore::new(), provider.tracer("demo"), Arc::new(scheme));
//!
//! let mut cm = ConfigMap::new("default", "settings");
//! client.create(&Context::new(), &mut cm).await?;
//!
//! // the stored object now carries kubetracer.io/trace-id and span-id
//! let (cx, mut fetched) = client.start_trace::<ConfigMap>(&Context::new(), &cm.key()).await?;
//! client.end_trace(&cx, &mut fetched).await?;
//! cx.span().end();
//! # Ok(())
//! # }
//! ```

mod status;

use std::sync::Arc;

use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::codec::{self, TraceContext};
use crate::constants::{SPAN_ID_ANNOTATION, TRACE_ID_ANNOTATION};
use crate::object::{Object, ObjectKey, ObjectList};
use crate::scheme::Scheme;
use crate::span::{attributes, SpanStarter};
use crate::store::patch::apply_merge_patch;
use crate::store::{DeleteAllOfOptions, ListOptions, ObjectStore, Patch, StoreError};
use crate::Result;

pub use status::StatusWriter;

/// Record a store failure on the span in `cx`, end the span and pass the
/// result through unchanged
fn finish<R>(cx: &Context, result: std::result::Result<R, StoreError>) -> Result<R> {
    let span = cx.span();
    if let Err(error) = &result {
        debug!(error = %error, "Store call failed");
        span.record_error(error);
        span.set_status(Status::error(error.to_string()));
    }
    span.end();
    result.map_err(Into::into)
}

/// Add the annotation markers of `obj` to a literal merge document
fn with_annotation_markers<O: Object>(patch: &Patch, obj: &O) -> Patch {
    let (Patch::Merge(document), Some(trace)) = (patch, codec::read_from_object(obj)) else {
        return patch.clone();
    };
    let mut annotations = Map::new();
    annotations.insert(TRACE_ID_ANNOTATION.to_string(), Value::String(trace.trace_id));
    annotations.insert(SPAN_ID_ANNOTATION.to_string(), Value::String(trace.span_id));

    let mut document = document.clone();
    apply_merge_patch(
        &mut document,
        &serde_json::json!({ "metadata": { "annotations": annotations } }),
    );
    Patch::Merge(document)
}

/// Store client that propagates trace context through stored objects
pub struct TracingClient<S, T> {
    store: S,
    spans: SpanStarter<T>,
    scheme: Arc<Scheme>,
}

impl<S, T> TracingClient<S, T>
where
    S: ObjectStore,
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    pub fn new(store: S, tracer: T, scheme: Arc<Scheme>) -> Self {
        Self {
            store,
            spans: SpanStarter::new(tracer, scheme.clone()),
            scheme,
        }
    }

    /// The wrapped store, for reads that must bypass tracing
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    fn kind<O: Object>(&self) -> Result<String> {
        Ok(self.scheme.kind_of::<O>()?.kind.clone())
    }

    /// Stamp the span active in `cx` onto the object's annotations
    fn stamp<O: Object>(cx: &Context, obj: &mut O) {
        if let Some(trace) = TraceContext::from_span_context(cx.span().span_context()) {
            codec::stamp_onto_object(obj, &trace);
        }
    }

    /// Start a span with no object to fall back on
    pub fn start_span(&self, cx: &Context, name: impl Into<String>) -> Context {
        self.spans.start_without_object(cx, name.into())
    }

    pub async fn create<O: Object>(&self, cx: &Context, obj: &mut O) -> Result<()> {
        let kind = self.kind::<O>()?;
        let cx = self
            .spans
            .start(cx, format!("Create {} {}", kind, obj.name()), Some(&*obj));
        Self::stamp(&cx, obj);
        debug!(kind = %kind, key = %obj.key(), "Creating object");
        finish(&cx, self.store.create(obj).await)
    }

    /// Read an object; the span continues the ambient trace only
    pub async fn get<O: Object>(&self, cx: &Context, key: &ObjectKey) -> Result<O> {
        let kind = self.kind::<O>()?;
        let cx = self
            .spans
            .start::<O>(cx, format!("Get {} {}", kind, key.name), None);
        cx.span()
            .set_attribute(KeyValue::new(attributes::OBJECT_KIND, kind));
        cx.span()
            .set_attribute(KeyValue::new(attributes::OBJECT_NAME, key.name.clone()));
        finish(&cx, self.store.get(key).await)
    }

    pub async fn update<O: Object>(&self, cx: &Context, obj: &mut O) -> Result<()> {
        let kind = self.kind::<O>()?;
        let cx = self
            .spans
            .start(cx, format!("Update {} {}", kind, obj.name()), Some(&*obj));
        Self::stamp(&cx, obj);
        debug!(kind = %kind, key = %obj.key(), "Updating object");
        finish(&cx, self.store.update(obj).await)
    }

    /// Patch an object.
    ///
    /// The markers are stamped after `patch` was built, so a merge-from patch
    /// picks them up from the object. A literal merge document gets them
    /// merged into its `metadata.annotations`.
    pub async fn patch<O: Object>(&self, cx: &Context, obj: &mut O, patch: &Patch) -> Result<()> {
        let kind = self.kind::<O>()?;
        let cx = self
            .spans
            .start(cx, format!("Patch {} {}", kind, obj.name()), Some(&*obj));
        Self::stamp(&cx, obj);
        let patch = with_annotation_markers(patch, obj);
        debug!(kind = %kind, key = %obj.key(), "Patching object");
        finish(&cx, self.store.patch(obj, &patch).await)
    }

    /// Delete an object. Nothing is stamped since nothing is persisted.
    pub async fn delete<O: Object>(&self, cx: &Context, obj: &O) -> Result<()> {
        let kind = self.kind::<O>()?;
        let cx = self
            .spans
            .start(cx, format!("Delete {} {}", kind, obj.name()), Some(obj));
        debug!(kind = %kind, key = %obj.key(), "Deleting object");
        finish(&cx, self.store.delete(obj).await)
    }

    pub async fn delete_all_of<O: Object>(&self, cx: &Context, opts: &DeleteAllOfOptions) -> Result<()> {
        let kind = self.kind::<O>()?;
        let cx = self.spans.start::<O>(cx, format!("DeleteAllOf {}", kind), None);
        cx.span()
            .set_attribute(KeyValue::new(attributes::OBJECT_KIND, kind.clone()));
        debug!(kind = %kind, namespace = ?opts.namespace, "Deleting all matching objects");
        finish(&cx, self.store.delete_all_of::<O>(opts).await)
    }

    pub async fn list<O: Object>(&self, cx: &Context, opts: &ListOptions) -> Result<ObjectList<O>> {
        let kind = self.kind::<O>()?;
        let cx = self.spans.start::<O>(cx, format!("List {}List", kind), None);
        cx.span()
            .set_attribute(KeyValue::new(attributes::OBJECT_KIND, kind));
        finish(&cx, self.store.list(opts).await)
    }

    /// Resume the trace handed over in `key`.
    ///
    /// Decodes `key`, reads the object under its real name and, when the key
    /// carried a trace, stamps it onto the object over any persisted markers.
    /// Returns a context whose active span the caller must end.
    pub async fn start_trace<O: Object>(&self, cx: &Context, key: &ObjectKey) -> Result<(Context, O)> {
        let kind = self.kind::<O>()?;
        let decoded = codec::decode(key);

        let mut obj: O = match self.store.get(&decoded.key).await {
            Ok(obj) => obj,
            Err(error) => {
                debug!(error = %error, key = %decoded.key, "Failed to read object for trace start");
                cx.span().record_error(&error);
                return Err(error.into());
            }
        };

        if let Some(trace) = decoded.trace_context() {
            codec::stamp_onto_object(&mut obj, &trace);
            if self.scheme.supports_conditions::<O>() {
                codec::stamp_conditions(&self.scheme, &mut obj, &trace)?;
            }
        }

        let name = if decoded.ok {
            format!("StartTrace {} {}", decoded.caller_kind, decoded.caller_name)
        } else {
            format!("StartTrace {} {}", kind, obj.name())
        };
        let cx = self.spans.start(cx, name, Some(&obj));
        if decoded.ok {
            let span = cx.span();
            span.set_attribute(KeyValue::new(attributes::CALLER_KIND, decoded.caller_kind));
            span.set_attribute(KeyValue::new(attributes::CALLER_NAME, decoded.caller_name));
        }
        Ok((cx, obj))
    }

    /// Remove the trace markers from `obj` and the stored object.
    ///
    /// The stored object is read first. If it already carries a different
    /// trace, a newer trace has taken over the object and nothing is removed.
    ///
    /// Each removal patch writes the stored result back into `obj`, so edits
    /// to `obj` that were never saved are discarded. Persist them first.
    pub async fn end_trace<O: Object>(&self, cx: &Context, obj: &mut O) -> Result<()> {
        let kind = self.kind::<O>()?;
        let Some((current, _)) = codec::markers(&self.scheme, obj) else {
            return Ok(());
        };

        let cx = self
            .spans
            .start(cx, format!("EndTrace {} {}", kind, obj.name()), Some(&*obj));
        let fresh: O = match self.store.get(&obj.key()).await {
            Ok(fresh) => fresh,
            Err(error) => return finish(&cx, Err(error)),
        };

        let fresh_trace = codec::markers(&self.scheme, &fresh).map(|(trace, _)| trace.trace_id);
        if fresh_trace.as_deref() != Some(current.trace_id.as_str()) {
            info!(
                key = %obj.key(),
                trace_id = %current.trace_id,
                stored_trace_id = fresh_trace.as_deref().unwrap_or(""),
                "Skipping trace teardown, object moved on to a newer trace"
            );
            cx.span().add_event("teardown skipped", vec![]);
            return finish(&cx, Ok(()));
        }

        let snapshot = obj.clone();
        if codec::remove_annotation_markers(obj) {
            let result = match Patch::merge_from(&snapshot) {
                Ok(patch) => self.store.patch(obj, &patch).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                return finish(&cx, Err(error));
            }
        }

        let snapshot = obj.clone();
        if codec::remove_condition_markers(&self.scheme, obj)? {
            let result = match Patch::merge_from(&snapshot) {
                Ok(patch) => self.store.patch_status(obj, &patch).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                return finish(&cx, Err(error));
            }
        }

        debug!(key = %obj.key(), trace_id = %current.trace_id, "Removed trace markers");
        finish(&cx, Ok(()))
    }

    /// Writer for the status subresource
    pub fn status(&self) -> StatusWriter<'_, S, T> {
        StatusWriter::new(self)
    }

    /// Rewrite `key` so its name carries the trace markers of `obj` and the
    /// identity of `obj` as caller. Objects without markers leave `key` as is.
    pub fn embed_trace_id_in_namespaced_name<O: Object>(&self, key: &mut ObjectKey, obj: &O) -> Result<()> {
        let kind = self.kind::<O>()?;
        let Some((trace, _)) = codec::markers(&self.scheme, obj) else {
            return Ok(());
        };
        if trace.is_empty() {
            return Ok(());
        }
        *key = codec::encode(&trace, key, &kind, obj.name());
        Ok(())
    }
}
