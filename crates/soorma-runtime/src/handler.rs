//! Handler registration and dispatch (spec §4.5 "handler table"):
//! per-(topic, event_type) registrations, each with its own in-flight
//! concurrency cap, dispatched onto spawned tasks.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use soorma_envelope::Envelope;
use soorma_types::Topic;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, instrument};

use crate::context::PlatformContext;

/// A handler's future, boxed so the table can hold heterogeneous
/// closures.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A registered handler: what it listens for, how many concurrent
/// invocations it tolerates, and the closure itself.
pub struct Registration {
    pub topic: Topic,
    pub event_type: String,
    pub queue_group: Option<String>,
    pub max_in_flight: NonZeroUsize,
    pub handler: Arc<dyn Fn(PlatformContext, Envelope) -> HandlerFuture + Send + Sync>,
}

/// Read-mostly table of registrations, keyed by `(topic, event_type)`
/// (spec §4.5: one handler per event type per agent process).
#[derive(Clone, Default)]
pub struct HandlerTable {
    inner: Arc<RwLock<HashMap<(Topic, String), Arc<Registration>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, registration: Registration) {
        let key = (registration.topic, registration.event_type.clone());
        self.inner.write().await.insert(key, Arc::new(registration));
    }

    pub async fn lookup(&self, topic: Topic, event_type: &str) -> Option<Arc<Registration>> {
        self.inner.read().await.get(&(topic, event_type.to_string())).cloned()
    }
}

/// Per-event-type semaphores gating `max_in_flight` (spec §4.5).
#[derive(Clone, Default)]
pub struct DashSemaphores {
    inner: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl DashSemaphores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, event_type: &str, max_in_flight: NonZeroUsize) -> Arc<Semaphore> {
        self.inner
            .entry(event_type.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(max_in_flight.get())))
            .clone()
    }
}

/// Look up the handler for `envelope`, acquire its concurrency permit, and
/// spawn the invocation. A no-op (with a debug log) if no handler is
/// registered for `envelope.topic`/`event_type` — dispatch loops are
/// expected to subscribe only to event types they've registered for, but
/// this guards against a stale subscription surviving a deregistration.
#[instrument(skip(table, semaphores, platform, envelope), fields(event_type = %envelope.event_type))]
pub async fn dispatch_one(table: &HandlerTable, semaphores: &DashSemaphores, platform: PlatformContext, envelope: Envelope) {
    let Some(registration) = table.lookup(envelope.topic, &envelope.event_type).await else {
        tracing::debug!("no handler registered for this event type, dropping");
        return;
    };

    let semaphore = semaphores.get_or_create(&registration.event_type, registration.max_in_flight);
    let Ok(permit) = semaphore.acquire_owned().await else {
        error!("handler semaphore closed unexpectedly");
        return;
    };

    let handler = registration.handler.clone();
    tokio::spawn(async move {
        let _permit = permit;
        handler(platform, envelope).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_none_for_unregistered_key() {
        let table = HandlerTable::new();
        assert!(table.lookup(Topic::ActionRequests, "unknown.event").await.is_none());
    }

    #[tokio::test]
    async fn register_then_lookup_finds_the_same_registration() {
        let table = HandlerTable::new();
        table
            .register(Registration {
                topic: Topic::ActionRequests,
                event_type: "calc.add.requested".to_string(),
                queue_group: None,
                max_in_flight: NonZeroUsize::new(1).unwrap(),
                handler: Arc::new(|_, _| Box::pin(async {})),
            })
            .await;
        let found = table.lookup(Topic::ActionRequests, "calc.add.requested").await;
        assert!(found.is_some());
    }

    #[test]
    fn dash_semaphores_reuses_the_same_semaphore_per_event_type() {
        let semaphores = DashSemaphores::new();
        let cap = NonZeroUsize::new(2).unwrap();
        let a = semaphores.get_or_create("calc.add.requested", cap);
        let b = semaphores.get_or_create("calc.add.requested", cap);
        assert_eq!(a.available_permits(), b.available_permits());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
