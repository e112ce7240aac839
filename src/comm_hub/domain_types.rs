//! Domain types for the coordination hub
//!
//! Strongly-typed values specific to messaging and coordination: envelopes,
//! delivery priorities, snapshot views of kernel primitives, and validated
//! capacity types consumed by the hub configuration.

use nutype::nutype;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub use crate::domain_types::{
    AgentId, BarrierName, CollectorId, MessageId, RegionName, RequestId, ResourceName,
    SemaphoreName, TopicName,
};

/// Delivery priority of an envelope
///
/// Priority affects the sort order of message queries only; delivery itself
/// is immediate and synchronous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Sorted before normal and low
    High,
    /// Default priority
    #[default]
    Normal,
    /// Sorted after high and normal
    Low,
}

impl Priority {
    /// Sort rank with `High < Normal < Low`
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Destination of an envelope: a specific agent or every subscriber
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Broadcast to every subscriber of the topic except the sender
    All,
    /// Deliver to one agent's handler on the topic
    Agent(AgentId),
}

impl Recipient {
    /// True when this recipient is the broadcast wildcard
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::All)
    }

    /// True when `agent` should receive an envelope addressed to this recipient
    #[must_use]
    pub fn includes(&self, agent: &AgentId) -> bool {
        match self {
            Self::All => true,
            Self::Agent(target) => target == agent,
        }
    }
}

// Wire form is the bare agent id string, with "*" as the broadcast wildcard.
impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("*"),
            Self::Agent(id) => serializer.serialize_str(id.as_ref()),
        }
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "*" {
            return Ok(Self::All);
        }
        AgentId::try_new(raw)
            .map(Self::Agent)
            .map_err(D::Error::custom)
    }
}

/// The unit of message passing: one send operation produces one envelope
///
/// Immutable once sent. `id` and `timestamp` are assigned by the hub; the
/// serialized form is `{id, timestamp, from, to, topic, payload, priority,
/// ttl?, replyTo?}` with `priority` encoded as one of the three named
/// strings and `payload` opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique envelope identity, assigned on send
    pub id: MessageId,
    /// Send time in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Sending agent
    pub from: AgentId,
    /// Destination agent or the broadcast wildcard
    pub to: Recipient,
    /// Channel the envelope was sent on
    pub topic: TopicName,
    /// Opaque caller payload
    pub payload: Value,
    /// Delivery priority (query-ordering only)
    pub priority: Priority,
    /// Optional time-to-live in milliseconds from `timestamp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Envelope this one replies to, for request/reply correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl Envelope {
    /// Expiry instant in epoch milliseconds, if the envelope carries a TTL
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl.map(|ttl| self.timestamp.saturating_add(ttl))
    }

    /// True when the envelope's TTL has elapsed at `now_ms`
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at().is_some_and(|at| at <= now_ms)
    }
}

/// Caller-supplied portion of an envelope, before the hub assigns identity
#[derive(Debug, Clone)]
pub struct EnvelopeDraft {
    /// Sending agent
    pub from: AgentId,
    /// Destination agent or the broadcast wildcard
    pub to: Recipient,
    /// Channel to send on
    pub topic: TopicName,
    /// Opaque caller payload
    pub payload: Value,
    /// Delivery priority
    pub priority: Priority,
    /// Optional time-to-live in milliseconds
    pub ttl: Option<u64>,
    /// Envelope this one replies to
    pub reply_to: Option<MessageId>,
}

impl EnvelopeDraft {
    /// Creates a draft with normal priority and no TTL or reply correlation
    #[must_use]
    pub fn new(from: AgentId, to: Recipient, topic: TopicName, payload: Value) -> Self {
        Self {
            from,
            to,
            topic,
            payload,
            priority: Priority::Normal,
            ttl: None,
            reply_to: None,
        }
    }

    /// Sets the delivery priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the time-to-live in milliseconds
    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    /// Marks the draft as a reply to an earlier envelope
    #[must_use]
    pub fn with_reply_to(mut self, original: MessageId) -> Self {
        self.reply_to = Some(original);
        self
    }
}

/// Which agents may write to a shared-memory region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessList {
    /// Any agent may write (the `*` wildcard)
    Public,
    /// Only the listed agents may write
    Agents(HashSet<AgentId>),
}

impl AccessList {
    /// Builds a restricted list from an iterator of agent ids
    pub fn agents<I: IntoIterator<Item = AgentId>>(ids: I) -> Self {
        Self::Agents(ids.into_iter().collect())
    }

    /// True when `agent` is allowed to write
    #[must_use]
    pub fn allows(&self, agent: &AgentId) -> bool {
        match self {
            Self::Public => true,
            Self::Agents(ids) => ids.contains(agent),
        }
    }
}

/// Snapshot of a granted lock
///
/// Returned from acquire operations and consumed by the deadlock detector;
/// never a live handle into manager state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Resource the lock covers
    pub resource: ResourceName,
    /// Current holder
    pub holder: AgentId,
    /// Grant time in epoch milliseconds
    pub acquired_at: u64,
    /// Expiry time in epoch milliseconds
    pub expires_at: u64,
    /// Agents waiting in FIFO order at snapshot time
    pub waiters: Vec<AgentId>,
}

/// Snapshot of a barrier's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierStatus {
    /// Barrier name
    pub name: BarrierName,
    /// Arrivals needed for release
    pub required: usize,
    /// Distinct agents that have arrived
    pub arrived: usize,
    /// True once the required count was reached
    pub released: bool,
}

/// Snapshot of a semaphore's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreStatus {
    /// Semaphore name
    pub name: SemaphoreName,
    /// Permit cap
    pub max_permits: usize,
    /// Permits currently available
    pub available: usize,
    /// Agents queued for a permit
    pub waiting: usize,
}

/// Metadata snapshot of a shared-memory region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region name
    pub name: RegionName,
    /// Owning agent (only the owner may delete)
    pub owner: AgentId,
    /// Monotonically increasing write version
    pub version: u64,
    /// Number of keys stored
    pub len: usize,
    /// Creation time in epoch milliseconds
    pub created_at: u64,
    /// Last write time in epoch milliseconds
    pub updated_at: u64,
    /// Optional region TTL in milliseconds from `updated_at`
    pub ttl: Option<u64>,
    /// Optional cap on the number of keys
    pub max_size: Option<usize>,
}

/// Aggregated outcome of a completed (or inspected) result collector
///
/// Every observer of the same collector receives the same maps. Errors count
/// toward the expected total but are kept apart from successful results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorOutcome {
    /// Successful submissions by agent
    pub results: HashMap<AgentId, Value>,
    /// Failed submissions by agent
    pub errors: HashMap<AgentId, String>,
}

/// A detected wait-for cycle among agents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// Cycle of agent ids, with the first id repeated at the end
    pub cycle: Vec<AgentId>,
    /// Resources involved in the cycle
    pub resources: Vec<ResourceName>,
}

/// Outcome of forced deadlock resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockResolution {
    /// The cycle that was broken
    pub info: DeadlockInfo,
    /// Agent whose locks were force-released
    pub victim: AgentId,
    /// Resources that were forcibly released
    pub released: Vec<ResourceName>,
}

/// Kind of input an outbound request is asking for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// Free-form text
    #[default]
    Text,
    /// One of the offered choices
    Choice,
    /// Yes/no confirmation
    Confirmation,
}

/// An outbound request for human or parent input, awaiting a correlated response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    /// Correlation key; at most one pending request per id
    pub request_id: RequestId,
    /// Requesting agent
    pub agent_id: AgentId,
    /// Question shown to the responder
    pub prompt: String,
    /// Offered choices, when `input_type` is `Choice`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    /// Kind of input requested
    pub input_type: InputType,
    /// Per-request timeout in milliseconds, when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Creation time in epoch milliseconds
    pub created_at: u64,
}

impl InputRequest {
    /// Creates a text request with a fresh id; `created_at` is stamped by the router
    #[must_use]
    pub fn new(agent_id: AgentId, prompt: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::generate(),
            agent_id,
            prompt: prompt.into(),
            choices: None,
            input_type: InputType::Text,
            timeout_ms: None,
            created_at: 0,
        }
    }

    /// Turns the request into a choice request with the given options
    #[must_use]
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.input_type = InputType::Choice;
        self.choices = Some(choices);
        self
    }

    /// Sets a per-request timeout in milliseconds
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// The resolved value of an input request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputResponse {
    /// Request this response resolves
    pub request_id: RequestId,
    /// Responder-supplied value
    pub value: Value,
    /// Resolution time in epoch milliseconds
    pub responded_at: u64,
}

/// Point-in-time counters across the hub and its delegates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Envelopes accepted by `send` since construction
    pub total_messages: u64,
    /// Channels currently alive
    pub active_channels: usize,
    /// Handler registrations across all channels
    pub total_subscriptions: usize,
    /// Requests still awaiting a reply envelope
    pub pending_replies: usize,
    /// Locks currently held
    pub active_locks: usize,
    /// Agents queued on contended locks
    pub waiting_acquirers: usize,
    /// Barriers that exist (released or not)
    pub active_barriers: usize,
    /// Semaphores that exist
    pub active_semaphores: usize,
    /// Shared-memory regions that exist
    pub active_regions: usize,
    /// Result collectors not yet garbage-collected
    pub active_collectors: usize,
    /// Input requests awaiting a response
    pub pending_input_requests: usize,
}

/// Capacity of a channel's bounded history
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct HistoryCapacity(usize);

impl HistoryCapacity {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Cap on the number of simultaneously existing channels
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 200
)]
pub struct MaxChannels(usize);

impl MaxChannels {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Interval of the periodic expiry sweep, in milliseconds
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct SweepIntervalMs(u64);

impl SweepIntervalMs {
    /// Converts to a `Duration`
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Lifetime of a granted lock before the sweep force-releases it, in milliseconds
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct LockTtlMs(u64);

impl LockTtlMs {
    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Default timeout applied to blocking waits that do not pass their own, in milliseconds
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct WaitTimeoutMs(u64);

impl WaitTimeoutMs {
    /// Converts to a `Duration`
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Bound on simultaneously pending input requests
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct MaxPendingInputs(usize);

impl MaxPendingInputs {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}
