use opentelemetry::trace::{TraceContextExt, Tracer};
use opentelemetry::Context;
use tracing::{debug, warn};

use super::{finish, TracingClient};
use crate::codec::{self, TraceContext};
use crate::object::Object;
use crate::store::{ObjectStore, Patch};
use crate::Result;

/// Status-subresource writes through a [`TracingClient`].
///
/// Status-only writes do not carry annotation changes, so kinds with
/// conditions get their markers as `TraceID` / `SpanID` conditions instead.
pub struct StatusWriter<'a, S, T> {
    client: &'a TracingClient<S, T>,
}

impl<'a, S, T> StatusWriter<'a, S, T>
where
    S: ObjectStore,
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    pub(super) fn new(client: &'a TracingClient<S, T>) -> Self {
        Self { client }
    }

    fn stamp<O: Object>(&self, cx: &Context, obj: &mut O) {
        let Some(trace) = TraceContext::from_span_context(cx.span().span_context()) else {
            return;
        };
        let scheme = &self.client.scheme;
        if scheme.supports_conditions::<O>() {
            if let Err(error) = codec::stamp_conditions(scheme, obj, &trace) {
                warn!(error = %error, "Failed to stamp condition markers");
            }
        } else {
            codec::stamp_onto_object(obj, &trace);
        }
    }

    /// Create the status subresource. Stores usually reject this; the error
    /// is recorded and returned like any other.
    pub async fn create<O: Object>(&self, cx: &Context, obj: &mut O) -> Result<()> {
        self.client.kind::<O>()?;
        let cx = self.client.spans.start(cx, "StatusCreate", Some(&*obj));
        self.stamp(&cx, obj);
        finish(&cx, self.client.store.create_status(obj).await)
    }

    pub async fn update<O: Object>(&self, cx: &Context, obj: &mut O) -> Result<()> {
        self.client.kind::<O>()?;
        let cx = self.client.spans.start(cx, "StatusUpdate", Some(&*obj));
        self.stamp(&cx, obj);
        debug!(key = %obj.key(), "Updating status");
        finish(&cx, self.client.store.update_status(obj).await)
    }

    /// Patch the status subresource. Markers reach the store only through a
    /// merge-from patch; a literal merge document is sent as given.
    pub async fn patch<O: Object>(&self, cx: &Context, obj: &mut O, patch: &Patch) -> Result<()> {
        self.client.kind::<O>()?;
        let cx = self.client.spans.start(cx, "StatusPatch", Some(&*obj));
        self.stamp(&cx, obj);
        debug!(key = %obj.key(), "Patching status");
        finish(&cx, self.client.store.patch_status(obj, patch).await)
    }
}
