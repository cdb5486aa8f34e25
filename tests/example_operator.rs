//! End-to-end reconcile chain with a custom kind
//!
//! An `Example` reconciler creates a ConfigMap named by the example's
//! `configName` label; a ConfigMap reconciler mirrors its data into a
//! Secret. The owner mapper and the update predicate sit between them the
//! way a watch would wire them, and the whole chain must share one trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use kubetracer::api::{self, ConfigMap, Secret};
use kubetracer::constants::TRACE_ID_ANNOTATION;
use kubetracer::error::ignore_not_found;
use kubetracer::event::{CreateEvent, UpdateEvent};
use kubetracer::{
    EnqueueRequestForOwner, GroupVersionKind, IgnoreTraceAnnotationUpdate, MemoryStore, Object,
    ObjectKey, ObjectMeta, ObjectStore, OwnerReference, Predicate, Request, Scheme, Scope,
    TracingClient,
};
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ExampleSpec {
    foo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Example {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ExampleSpec,
}

impl Object for Example {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

type Client = TracingClient<MemoryStore, Tracer>;

struct ExampleReconciler {
    client: Arc<Client>,
}

impl ExampleReconciler {
    async fn reconcile(&self, req: &Request) -> kubetracer::Result<()> {
        let (cx, example) = self
            .client
            .start_trace::<Example>(&Context::new(), &req.key)
            .await?;

        let config_name = example
            .meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get("configName"))
            .cloned()
            .unwrap_or_default();
        let mut config_map = ConfigMap::new("monitoring", config_name);
        config_map
            .data
            .insert("example-key".to_string(), "example-value".to_string());
        config_map.metadata.owner_references.push(OwnerReference {
            api_version: "example.kubetracer.io/v1".to_string(),
            kind: "Example".to_string(),
            name: example.name().to_string(),
            controller: Some(true),
            ..Default::default()
        });

        let result = self.client.create(&cx, &mut config_map).await;
        cx.span().end();
        result
    }
}

struct ConfigMapReconciler {
    client: Arc<Client>,
}

impl ConfigMapReconciler {
    async fn reconcile(&self, req: &Request) -> kubetracer::Result<()> {
        let (cx, config_map) = match self
            .client
            .start_trace::<ConfigMap>(&Context::new(), &req.key)
            .await
        {
            Ok(found) => found,
            Err(e) => return ignore_not_found(Err(e)),
        };

        let mut secret = Secret::new(
            config_map.namespace(),
            format!("{}-secret", config_map.name()),
        );
        secret.string_data = config_map.data.clone();

        // create, or update the secret when it already exists
        let result = match self.client.create(&cx, &mut secret).await {
            Ok(()) => Ok(()),
            Err(_) => match self.client.get::<Secret>(&cx, &secret.key()).await {
                Ok(mut existing) => {
                    existing.string_data = secret.string_data;
                    self.client.update(&cx, &mut existing).await
                }
                Err(e) => Err(e),
            },
        };
        cx.span().end();
        result
    }
}

fn setup() -> (TracerProvider, Arc<Client>) {
    let provider = TracerProvider::builder().build();
    let mut scheme = Scheme::new();
    api::add_to_scheme(&mut scheme);
    scheme.register::<Example>(
        GroupVersionKind::new("example.kubetracer.io", "v1", "Example"),
        Scope::Namespaced,
    );
    let client = TracingClient::new(
        MemoryStore::new().with_status_subresource::<Example>(),
        provider.tracer("kubetracer"),
        Arc::new(scheme),
    );
    (provider, Arc::new(client))
}

async fn seed_example(client: &Client, namespace: &str) {
    let mut example = Example {
        metadata: ObjectMeta::new(namespace, "fake-example"),
        spec: ExampleSpec {
            foo: "bar".to_string(),
        },
    };
    example.metadata.labels = Some(BTreeMap::from([(
        "configName".to_string(),
        "example-configName".to_string(),
    )]));
    client.store().create(&mut example).await.unwrap();
}

#[tokio::test]
async fn test_reconcile_stamps_trace_on_created_config_map() {
    let (_provider, client) = setup();
    seed_example(&client, "fake-namespace").await;
    let reconciler = ExampleReconciler {
        client: client.clone(),
    };

    reconciler
        .reconcile(&Request::new("fake-namespace", "fake-example"))
        .await
        .unwrap();

    // resuming from the ConfigMap lands in the trace that created it
    let (cx, config_map) = client
        .start_trace::<ConfigMap>(
            &Context::new(),
            &ObjectKey::new("monitoring", "example-configName"),
        )
        .await
        .unwrap();
    let trace_id = cx.span().span_context().trace_id().to_string();
    assert_eq!(config_map.annotation(TRACE_ID_ANNOTATION), Some(trace_id.as_str()));
    assert_eq!(
        config_map.data.get("example-key").map(String::as_str),
        Some("example-value")
    );
    cx.span().end();
}

#[tokio::test]
async fn test_trace_flows_through_chained_reconcilers() {
    let (_provider, client) = setup();
    seed_example(&client, "fake-namespace").await;
    let examples = ExampleReconciler {
        client: client.clone(),
    };
    let config_maps = ConfigMapReconciler {
        client: client.clone(),
    };

    examples
        .reconcile(&Request::new("fake-namespace", "fake-example"))
        .await
        .unwrap();
    let config_map: ConfigMap = client
        .store()
        .get(&ObjectKey::new("monitoring", "example-configName"))
        .await
        .unwrap();
    let trace_id = config_map.annotation(TRACE_ID_ANNOTATION).unwrap().to_string();

    config_maps
        .reconcile(&Request::new("monitoring", "example-configName"))
        .await
        .unwrap();
    let secret: Secret = client
        .store()
        .get(&ObjectKey::new("monitoring", "example-configName-secret"))
        .await
        .unwrap();
    assert_eq!(secret.annotation(TRACE_ID_ANNOTATION), Some(trace_id.as_str()));
    assert_eq!(secret.string_data, config_map.data);

    // a second pass finds the secret and updates it in place
    config_maps
        .reconcile(&Request::new("monitoring", "example-configName"))
        .await
        .unwrap();
    assert_eq!(client.store().len::<Secret>().await, 1);
}

#[tokio::test]
async fn test_owner_event_hands_trace_back_to_owner() {
    let (_provider, client) = setup();
    // owners share the namespace of their children
    seed_example(&client, "monitoring").await;
    let examples = ExampleReconciler {
        client: client.clone(),
    };
    examples
        .reconcile(&Request::new("monitoring", "fake-example"))
        .await
        .unwrap();

    let config_map: ConfigMap = client
        .store()
        .get(&ObjectKey::new("monitoring", "example-configName"))
        .await
        .unwrap();
    let trace_id = config_map.annotation(TRACE_ID_ANNOTATION).unwrap().to_string();

    let handler = EnqueueRequestForOwner::new::<Example>(client.scheme().clone())
        .unwrap()
        .only_controller_owner();
    let mut queued = Vec::new();
    handler.create(&CreateEvent::new(config_map.clone()), &mut |req| {
        queued.push(req)
    });
    assert_eq!(queued.len(), 1);
    assert!(queued[0].key.name.starts_with(&trace_id));
    assert!(queued[0].key.name.ends_with(";ConfigMap;example-configName;fake-example"));

    // the owner reconcile resumes the child's trace from the encoded name
    let (cx, example) = client
        .start_trace::<Example>(&Context::new(), &queued[0].key)
        .await
        .unwrap();
    assert_eq!(example.name(), "fake-example");
    assert_eq!(cx.span().span_context().trace_id().to_string(), trace_id);
    cx.span().end();
}

#[tokio::test]
async fn test_marker_only_rewrite_is_filtered() {
    let (_provider, client) = setup();
    seed_example(&client, "fake-namespace").await;
    let examples = ExampleReconciler {
        client: client.clone(),
    };
    examples
        .reconcile(&Request::new("fake-namespace", "fake-example"))
        .await
        .unwrap();

    let key = ObjectKey::new("monitoring", "example-configName");
    let before: ConfigMap = client.store().get(&key).await.unwrap();

    // a new trace rewrites only the markers
    let cx = client.start_span(&Context::new(), "resync");
    let mut after = before.clone();
    client.update(&cx, &mut after).await.unwrap();
    cx.span().end();
    assert_ne!(
        before.annotation(TRACE_ID_ANNOTATION),
        after.annotation(TRACE_ID_ANNOTATION)
    );

    let predicate = IgnoreTraceAnnotationUpdate::new();
    assert!(!predicate.update(&UpdateEvent::new(before.clone(), after.clone())));

    let mut changed = after.clone();
    changed.data.insert("extra".to_string(), "1".to_string());
    client
        .update(&Context::new(), &mut changed)
        .await
        .unwrap();
    assert!(predicate.update(&UpdateEvent::new(after, changed)));
}
