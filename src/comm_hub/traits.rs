//! Error taxonomy, capability interfaces, and handler types for the hub
//!
//! Every fallible kernel operation resolves to exactly one [`HubError`]
//! classification. Optional collaborators (policy enforcement, health
//! actuation) are consumed through the explicit capability traits defined
//! here; an absent collaborator is an explicit `None` in the options record,
//! never an untyped null.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::domain_types::{AgentId, Envelope};

/// The kinds of named primitives the kernel manages
///
/// Used to classify `Unknown` and `Duplicate` failures without one error
/// variant per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// A named re-entrant lock
    Lock,
    /// A rendezvous barrier
    Barrier,
    /// A counting semaphore
    Semaphore,
    /// A shared-memory region
    Region,
    /// A result collector
    Collector,
    /// A pub/sub channel
    Channel,
    /// A pending input request
    InputRequest,
    /// A pending reply correlation entry
    PendingReply,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lock => "lock",
            Self::Barrier => "barrier",
            Self::Semaphore => "semaphore",
            Self::Region => "region",
            Self::Collector => "collector",
            Self::Channel => "channel",
            Self::InputRequest => "input request",
            Self::PendingReply => "pending reply",
        };
        f.write_str(name)
    }
}

/// Classified error type for every kernel operation
#[derive(Debug, Error)]
pub enum HubError {
    /// Lookup of a primitive that does not exist
    #[error("unknown {kind} '{name}'")]
    Unknown {
        /// Kind of primitive that was looked up
        kind: PrimitiveKind,
        /// Name that failed to resolve
        name: String,
    },

    /// Operation refused for the acting agent
    #[error("denied: agent '{agent}' may not {action} '{resource}'")]
    Denied {
        /// Agent that attempted the operation
        agent: AgentId,
        /// What the agent tried to do
        action: String,
        /// Resource the operation targeted
        resource: String,
    },

    /// A blocking wait exceeded its deadline
    #[error("timed out after {waited_ms}ms waiting for '{resource}'")]
    Timeout {
        /// Resource or primitive that was waited for
        resource: String,
        /// Elapsed wait in milliseconds
        waited_ms: u64,
    },

    /// A blocking wait was cancelled by the caller or by destroy
    #[error("wait for '{resource}' was cancelled")]
    Cancelled {
        /// Resource or primitive that was waited for
        resource: String,
    },

    /// A capacity cap was exceeded
    #[error("{subject} is full (limit {limit})")]
    Full {
        /// What hit its cap
        subject: String,
        /// The configured cap
        limit: usize,
    },

    /// Attempt to create a named primitive whose name already exists
    #[error("{kind} '{name}' already exists")]
    Duplicate {
        /// Kind of primitive being created
        kind: PrimitiveKind,
        /// The colliding name
        name: String,
    },

    /// Illegal operation sequence
    #[error("protocol violation: {message}")]
    Protocol {
        /// What was attempted out of order
        message: String,
    },

    /// Any operation on the kernel after destroy
    #[error("hub has been destroyed")]
    Disposed,
}

impl HubError {
    /// True when the error is a timeout classification
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the error is the disposed classification
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

/// Result alias for kernel operations
pub type HubResult<T> = Result<T, HubError>;

/// Subscriber callback invoked synchronously during `send`
///
/// Handlers run outside every internal critical section; a panicking handler
/// is isolated and does not affect other subscribers.
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Region watcher callback invoked with `(key, value, version)` after each write
pub type RegionWatcher = Arc<dyn Fn(&str, &Value, u64) + Send + Sync>;

/// Decision returned by the pre-send policy hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the send may proceed to its subscribers
    pub allowed: bool,
    /// Optional human-readable denial reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    /// An allowing decision
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denying decision with a reason
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Pre-send policy enforcement capability (consumed)
///
/// When wired, the hub invokes `check` before delivery; a denial delivers an
/// error envelope to the caller instead of reaching subscribers.
pub trait PolicyHook: Send + Sync + fmt::Debug {
    /// Checks whether an operation with the given name and arguments is allowed
    fn check(&self, tool_name: &str, args: &Value) -> PolicyDecision;
}

/// Health-actuation events the hub accepts from an external trigun dispatcher
///
/// Only the four event names and the failure-tolerance contract of their
/// handlers are normative; the dispatcher itself is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GunaEvent {
    /// Inertia/health-degradation alert
    TamasAlert,
    /// Overactivity alert
    RajasAlert,
    /// Healthy-equilibrium signal
    SattvaDominant,
    /// Dominant-guna transition
    GunaShift,
}

/// Handler invoked when a guna event is dispatched
///
/// A panicking handler must not abort other handlers or the dispatcher.
pub type GunaHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;

    #[test]
    fn timeout_message_names_resource_and_elapsed() {
        let err = HubError::Timeout {
            resource: "lock:db".to_string(),
            waited_ms: 250,
        };
        let text = err.to_string();
        assert!(text.contains("lock:db"));
        assert!(text.contains("250"));
        assert!(err.is_timeout());
    }

    #[test]
    fn denied_message_names_agent_and_resource() {
        let err = HubError::Denied {
            agent: AgentId::try_new("intruder").unwrap(),
            action: "write".to_string(),
            resource: "region:cfg".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("intruder"));
        assert!(text.contains("region:cfg"));
    }

    #[test]
    fn guna_events_serialize_to_their_wire_names() {
        assert_eq!(
            serde_json::to_value(GunaEvent::TamasAlert).unwrap(),
            "tamas_alert"
        );
        assert_eq!(
            serde_json::to_value(GunaEvent::GunaShift).unwrap(),
            "guna_shift"
        );
    }
}
