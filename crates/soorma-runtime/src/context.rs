//! [`PlatformContext`] — the handle a handler or plan routine receives on
//! every invocation (spec §9 "Dynamic PlatformContext" design note).

use std::sync::Arc;

use crate::bus::BusClient;
use crate::memory::MemoryClient;
use crate::registry::RegistryClient;

/// Bundles the three service clients an agent needs. Cheap to clone — all
/// fields are `Arc`s — so it can be handed to every spawned handler task
/// without lifetime gymnastics.
#[derive(Clone)]
pub struct PlatformContext {
    pub bus: Arc<dyn BusClient>,
    pub registry: Arc<dyn RegistryClient>,
    pub memory: Arc<dyn MemoryClient>,
}

impl PlatformContext {
    pub fn new(bus: Arc<dyn BusClient>, registry: Arc<dyn RegistryClient>, memory: Arc<dyn MemoryClient>) -> Self {
        Self { bus, registry, memory }
    }
}
