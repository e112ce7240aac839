//! Leader election by deterministic tiebreak
//!
//! Every participant computes the same winner from the same candidate set:
//! the lexicographically smallest agent id. The result is announced on a
//! topic so passive observers learn it too.

use serde_json::json;
use tracing::info;

use crate::comm_hub::domain_types::{AgentId, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::{HubError, HubResult};

/// Elects the leader among `candidates` and announces it on `topic`
///
/// Deterministic: the smallest id wins, so independent callers agree
/// without coordination.
pub fn elect_leader(
    hub: &CommHub,
    candidates: &[AgentId],
    topic: &TopicName,
) -> HubResult<AgentId> {
    let leader = candidates
        .iter()
        .min()
        .cloned()
        .ok_or_else(|| HubError::Protocol {
            message: "election requires at least one candidate".to_string(),
        })?;

    info!(%leader, candidates = candidates.len(), "leader elected");
    hub.broadcast(
        &leader,
        topic,
        json!({ "event": "leader_elected", "leader": leader.to_string() }),
    )?;
    Ok(leader)
}
