//! Base domain types for the sutra coordination kernel
//!
//! This module defines strongly-typed domain values to prevent primitive
//! obsession and improve type safety throughout the codebase. Identifiers
//! chosen by callers (agents, topics, resource names) are validated string
//! newtypes; identifiers assigned by the kernel (messages, collectors, input
//! requests) are UUID newtypes.

use nutype::nutype;
use uuid::Uuid;

/// Identity of a cooperating agent
///
/// Agent identities are caller-chosen strings. The kernel never interprets
/// them beyond equality and lexicographic ordering (the latter is the
/// deadlock-victim tiebreak).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a collision-resistant random agent identity
    ///
    /// # Panics
    /// Never panics; a UUID string always satisfies the length bounds.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("UUID string is a valid agent id")
    }
}

/// Name of a pub/sub topic
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct TopicName(String);

/// Key of a named lockable resource
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ResourceName(String);

/// Name of a shared-memory region
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct RegionName(String);

/// Name of a rendezvous barrier
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct BarrierName(String);

/// Name of a counting semaphore
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct SemaphoreName(String);

/// Unique identifier for an envelope, assigned by the hub on send
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a result collector
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct CollectorId(Uuid);

impl CollectorId {
    /// Creates a new random collector ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a pending input request
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_rejects_empty_and_whitespace() {
        assert!(AgentId::try_new("").is_err());
        assert!(AgentId::try_new("   ").is_err());
    }

    #[test]
    fn agent_id_trims_surrounding_whitespace() {
        let id = AgentId::try_new("  worker-1  ").unwrap();
        assert_eq!(id.to_string(), "worker-1");
    }

    #[test]
    fn agent_ids_order_lexicographically() {
        let a = AgentId::try_new("alpha").unwrap();
        let b = AgentId::try_new("beta").unwrap();
        assert!(a < b);
    }

    #[test]
    fn generated_message_ids_are_unique() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert_ne!(first, second);
    }
}
