//! Carry OpenTelemetry traces across reconcile loops.
//!
//! A controller that reacts to object changes loses its trace every time it
//! writes: the write lands in the store, a watch fires, and the next
//! reconcile starts from nothing. Kubetracer stamps the active trace and span
//! ids onto every object it writes, as annotations or status conditions, and
//! resumes from those markers when the next reconcile reads the object. The
//! whole chain of writes then shows up as one trace.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kubetracer::api::{self, Pod};
//! use kubetracer::config::KubetracerConfig;
//! use kubetracer::telemetry::Telemetry;
//! use kubetracer::{MemoryStore, Object, Scheme, TracingClient};
//! use opentelemetry::trace::TraceContextExt;
//! use opentelemetry::Context;
//!
//! #[tokio::main]
//! async fn main() -> kubetracer::Result<()> {
//!     let config = KubetracerConfig::from_env()?;
//!     let telemetry = Telemetry::init(&config)?;
//!
//!     let mut scheme = Scheme::new();
//!     api::add_to_scheme(&mut scheme);
//!     let client = TracingClient::new(MemoryStore::new(), telemetry.tracer(), Arc::new(scheme));
//!
//!     let mut pod = Pod::new("default", "web");
//!     client.create(&Context::new(), &mut pod).await?;
//!
//!     // a later reconcile picks the trace back up from the stored markers
//!     let (cx, mut pod) = client.start_trace::<Pod>(&Context::new(), &pod.key()).await?;
//!     pod.status.phase = "Running".to_string();
//!     client.status().update(&cx, &mut pod).await?;
//!     client.end_trace(&cx, &mut pod).await?;
//!     cx.span().end();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`client`] - The tracing interceptor around an [`ObjectStore`]
//! - [`codec`] - Trace marker encoding in annotations, conditions and keys
//! - [`span`] - Parent resolution and span creation
//! - [`predicates`] - Watch filter that ignores marker-only updates
//! - [`handlers`] - Owner-mapping event handler
//! - [`store`] - Store abstraction and an in-memory implementation
//! - [`config`] and [`telemetry`] - Exporter and logging setup

pub mod api;
pub mod client;
pub mod codec;
pub mod conditions;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod handlers;
pub mod object;
pub mod predicates;
pub mod scheme;
pub mod span;
pub mod store;
pub mod telemetry;

pub use client::{StatusWriter, TracingClient};
pub use codec::TraceContext;
pub use error::KubetracerError;
pub use handlers::{EnqueueRequestForOwner, Request};
pub use object::{Condition, HasConditions, Object, ObjectKey, ObjectMeta, OwnerReference};
pub use predicates::{IgnoreTraceAnnotationUpdate, Predicate};
pub use scheme::{GroupKind, GroupVersionKind, Scheme, Scope};
pub use store::{MemoryStore, ObjectStore, Patch, StoreError};

pub type Result<T> = std::result::Result<T, KubetracerError>;
