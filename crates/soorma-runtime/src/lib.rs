#![forbid(unsafe_code)]

//! **soorma-runtime** – The Agent Runtime Contract (component C6): the
//! client SDK an agent process links against.
//!
//! An agent built on this crate gets three service clients bundled in a
//! [`PlatformContext`], a [`HandlerTable`] for registering per-event-type
//! handlers with their own concurrency caps, a [`TaskContext`] for
//! tracking one in-flight request through delegation and completion, and
//! plan-transition helpers ([`plan`]) for state-machine-driven execution.
//!
//! Real HTTP clients ([`bus::HttpBusClient`], [`registry::HttpRegistryClient`],
//! [`memory::HttpMemoryClient`]) are always available. Behind the
//! `testing` feature, [`fakes`] provides in-process equivalents wired
//! directly to the other services' storage traits, for handler tests that
//! don't want to stand up real HTTP servers.

pub mod bus;
pub mod context;
pub mod entities;
pub mod error;
pub mod handler;
pub mod identity;
pub mod memory;
pub mod plan;
pub mod registration;
pub mod registry;
pub mod task;
mod transport;

#[cfg(feature = "testing")]
pub mod fakes;

pub use bus::{BusClient, EnvelopeStream, HttpBusClient, SubscribeFilter};
pub use context::PlatformContext;
pub use error::RuntimeError;
pub use handler::{DashSemaphores, HandlerTable, Registration};
pub use identity::Identity;
pub use memory::{HttpMemoryClient, MemoryClient, ScoredRow};
pub use plan::PlanAction;
pub use registration::register_and_heartbeat;
pub use registry::{HttpRegistryClient, RegistryClient};
pub use task::{DelegationSpec, TaskContext};
