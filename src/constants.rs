//! Persisted field names shared by every component.
//!
//! These values are written into stored objects and read back by other
//! processes, so they must stay bit-exact across releases.

/// Annotation carrying the 128-bit trace id as lowercase hex
pub const TRACE_ID_ANNOTATION: &str = "kubetracer.io/trace-id";

/// Annotation carrying the 64-bit span id as lowercase hex
pub const SPAN_ID_ANNOTATION: &str = "kubetracer.io/span-id";

/// Condition type carrying the trace id in its message
pub const TRACE_ID_CONDITION: &str = "TraceID";

/// Condition type carrying the span id in its message
pub const SPAN_ID_CONDITION: &str = "SpanID";

/// Reason written on marker conditions
pub const MARKER_CONDITION_REASON: &str = "TraceContext";

/// Separator between the fields of an encoded object name
pub const NAME_SEPARATOR: char = ';';

/// Name of the store-assigned concurrency token in the serialized metadata
pub const RESOURCE_VERSION_KEY: &str = "resourceVersion";

/// Event-kind tag for records built from the current object state
pub const EVENT_KIND_NEW: &str = "new";

/// Event-kind tag for records built from the previous object state
pub const EVENT_KIND_OLD: &str = "old";
