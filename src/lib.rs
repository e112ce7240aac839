//! # Sutra - In-Process Coordination Substrate for Cooperating Agents
//!
//! Sutra is the coordination kernel that lets many cooperating agents in one
//! process pass messages, share state, synchronize, and aggregate partial
//! results while remaining resistant to deadlock and starvation. Agent
//! lifecycle, policy authoring, tool dispatch, and model drivers are
//! collaborators that sit on top of this crate; the kernel carries the
//! concurrency discipline they all rely on:
//!
//! - FIFO-fair named locks with re-entrancy, timeouts, and forced release
//! - Rendezvous barriers and strictly fair counting semaphores
//! - Versioned shared-memory regions with ACLs, TTLs, and change watchers
//! - Result collectors for aggregating parallel work
//! - Pub/sub channels with bounded history and request/reply correlation
//! - Wait-for-graph deadlock detection with victim selection
//! - Bounded routing of outbound input requests to inbound responses
//!
//! The kernel is single-process and in-memory: a remote transport would
//! wrap it, and nothing survives [`CommHub::destroy`]. Everything is an
//! instance; the crate installs no global state.

// Core modules
pub mod comm_hub;
pub mod domain_types;
pub mod time_provider;

// Re-export the main surface
pub use crate::comm_hub::config::{ConfigError, HubConfig, HubConfigBuilder};
pub use crate::comm_hub::domain_types::{
    AccessList, BarrierStatus, CollectorOutcome, DeadlockInfo, DeadlockResolution, Envelope,
    EnvelopeDraft, HubStats, InputRequest, InputResponse, InputType, LockInfo, Priority, Recipient,
    RegionInfo, SemaphoreStatus,
};
pub use crate::comm_hub::hub::{CommHub, HubOptions, Subscription};
pub use crate::comm_hub::traits::{
    GunaEvent, GunaHandler, HubError, HubResult, MessageHandler, PolicyDecision, PolicyHook,
    PrimitiveKind, RegionWatcher,
};
pub use crate::comm_hub::{
    BarrierManager, DeadlockDetector, LockManager, SandeshaRouter, SemaphoreManager,
    SharedMemoryManager,
};
pub use crate::domain_types::{
    AgentId, BarrierName, CollectorId, MessageId, RegionName, RequestId, ResourceName,
    SemaphoreName, TopicName,
};
pub use crate::time_provider::{
    MockTimeProvider, RealTimeProvider, SharedTimeProvider, TimeProvider,
    production_time_provider, test_time_provider,
};
