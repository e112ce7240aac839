//! Coordination hub for cooperating in-process agents
//!
//! This module implements the crate's core: a single [`CommHub`] instance
//! that many agents drive concurrently to pass messages, share state,
//! synchronize, and aggregate partial results while staying resistant to
//! deadlock and starvation.
//!
//! ## Components
//!
//! - [`CommHub`]: pub/sub channels, request/reply correlation, broadcast,
//!   and the periodic expiry sweep
//! - [`LockManager`]: named re-entrant locks with FIFO wait queues,
//!   timeouts, and forced release
//! - [`BarrierManager`]: named rendezvous barriers (N arrivals release all)
//! - [`SemaphoreManager`]: counting semaphores with strictly fair queues
//! - [`SharedMemoryManager`]: versioned key-value regions with ACLs, TTLs,
//!   and watchers, plus result collectors
//! - [`DeadlockDetector`]: wait-for-graph cycle detection and forced
//!   resolution
//! - [`SandeshaRouter`]: correlation of outbound input requests to inbound
//!   responses with per-request timeouts and a bounded pending set
//! - [`patterns`]: fan-out, pipeline, map-reduce, saga, election, and
//!   gossip, composed purely from the public surface
//!
//! ## Concurrency contract
//!
//! The hub tolerates parallel callers from many tasks or threads. Only lock
//! acquire, barrier arrive, semaphore acquire, `request`, collector
//! `wait_for_all`, and input `ask` suspend; everything else completes
//! without suspension. Wait queues are strict FIFO, region writes are
//! linearizable per region, and per-topic history preserves send order.
//! No user-supplied callback is ever invoked while an internal lock is
//! held, so handlers may freely call back into the hub.
//!
//! ## Timeouts and teardown
//!
//! Every blocking operation releases its queue slot, pending entry, and
//! timer on the timeout path before failing. `destroy` is idempotent and
//! acts as an implicit cancellation for every outstanding waiter; all
//! public operations fail fast afterwards.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use sutra::comm_hub::{CommHub, HubConfig};
//! use sutra::domain_types::{AgentId, TopicName};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Arc::new(CommHub::new(HubConfig::production()));
//!
//! let worker = AgentId::try_new("worker-1")?;
//! let topic = TopicName::try_new("work")?;
//! let responder = Arc::clone(&hub);
//! let me = worker.clone();
//! hub.subscribe(&worker, &topic, Arc::new(move |envelope| {
//!     let _ = responder.reply(envelope.id, &me, json!("done"));
//! }))?;
//!
//! let boss = AgentId::try_new("boss")?;
//! let reply = hub.request(&worker, &topic, json!("build"), &boss, None).await?;
//! println!("worker said: {}", reply.payload);
//!
//! hub.destroy();
//! # Ok(())
//! # }
//! ```

pub mod barriers;
pub(crate) mod callbacks;
pub mod config;
pub mod deadlock;
pub mod domain_types;
pub mod hub;
pub mod locks;
pub mod patterns;
pub mod sandesha;
pub mod semaphores;
pub mod shared_memory;
pub mod traits;

pub use barriers::BarrierManager;
pub use config::{ConfigError, HubConfig, HubConfigBuilder};
pub use deadlock::DeadlockDetector;
pub use domain_types::*;
pub use hub::{CommHub, HubOptions, Subscription};
pub use locks::LockManager;
pub use sandesha::SandeshaRouter;
pub use semaphores::SemaphoreManager;
pub use shared_memory::{RegionWatch, SharedMemoryManager};
pub use traits::*;
