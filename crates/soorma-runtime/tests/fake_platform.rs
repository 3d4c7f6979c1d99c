//! End-to-end exercise of the `testing`-feature in-process fakes: a
//! handler registered on [`HandlerTable`], dispatched via
//! [`dispatch_one`], delegating a sub-task through [`TaskContext`], and
//! completing it — all without any HTTP server running.

#![cfg(feature = "testing")]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use soorma_backbone::InMemoryBackbone;
use soorma_envelope::EnvelopeBuilder;
use soorma_memory::embedding::HashEmbeddingProvider;
use soorma_memory::memory::InMemoryStore as InMemoryMemoryStore;
use soorma_registry::memory::InMemoryStore as InMemoryRegistryStore;
use soorma_runtime::fakes::{FakeBusClient, FakeMemoryClient, FakeRegistryClient};
use soorma_runtime::handler::{dispatch_one, DashSemaphores, HandlerTable, Registration};
use soorma_runtime::{Identity, PlatformContext, TaskContext};
use soorma_types::Topic;

fn test_platform() -> PlatformContext {
    let backbone = Arc::new(InMemoryBackbone::default());
    let registry_store = Arc::new(InMemoryRegistryStore::new());
    let memory_store = Arc::new(InMemoryMemoryStore::new());
    let embeddings = Arc::new(HashEmbeddingProvider::new(16));
    let identity = Identity::dev("t1", "u1");

    PlatformContext::new(
        Arc::new(FakeBusClient::new(backbone)),
        Arc::new(FakeRegistryClient::new(registry_store)),
        Arc::new(FakeMemoryClient::new(memory_store, embeddings, identity)),
    )
}

#[tokio::test]
async fn task_context_delegate_then_complete_round_trips() {
    let platform = test_platform();
    let request = EnvelopeBuilder::new("order.process.requested", Topic::ActionRequests, "t1")
        .user_id("u1")
        .data(json!({"order_id": "o-1"}))
        .request("order.process.done");

    let mut task = TaskContext::start(platform.clone(), "order-agent:1.0.0", request, None).await.unwrap();
    assert!(!task.task_id().is_empty());

    let correlation_id = task
        .delegate("inventory.reserve.requested", json!({"sku": "x"}), "inventory.reserve.done", "reserve")
        .await
        .unwrap();
    assert!(!correlation_id.is_empty());

    task.complete(json!({"status": "ok"})).await.unwrap();
}

#[tokio::test]
async fn registered_handler_is_invoked_on_matching_envelope() {
    let platform = test_platform();
    let table = HandlerTable::new();
    let semaphores = DashSemaphores::new();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    table
        .register(Registration {
            topic: Topic::ActionRequests,
            event_type: "calc.add.requested".to_string(),
            queue_group: None,
            max_in_flight: NonZeroUsize::new(4).unwrap(),
            handler: Arc::new(move |_platform, envelope| {
                let tx = tx.clone();
                Box::pin(async move {
                    tx.send(envelope.event_type).ok();
                })
            }),
        })
        .await;

    let envelope = EnvelopeBuilder::new("calc.add.requested", Topic::ActionRequests, "t1")
        .data(json!({"a": 1, "b": 2}))
        .request("calc.add.done");

    dispatch_one(&table, &semaphores, platform, envelope).await;

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, "calc.add.requested");
}

#[tokio::test]
async fn unregistered_event_type_is_dropped_without_panicking() {
    let platform = test_platform();
    let table = HandlerTable::new();
    let semaphores = DashSemaphores::new();

    let envelope = EnvelopeBuilder::new("never.registered", Topic::ActionRequests, "t1")
        .data(json!({}))
        .request("never.registered.done");

    dispatch_one(&table, &semaphores, platform, envelope).await;
}
