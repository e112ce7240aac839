//! Gossip: spread a value to a peer set in bounded-fanout waves
//!
//! Each wave, every informed agent forwards the value to at most `fanout`
//! not-yet-informed peers as directed envelopes. Deterministic (no random
//! peer sampling), so tests and replays see identical spread order.

use serde_json::Value;
use tracing::debug;

use crate::comm_hub::domain_types::{AgentId, EnvelopeDraft, Recipient, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::{HubError, HubResult};

/// Spreads `value` from `origin` to every peer, `fanout` sends per informed
/// agent per wave
///
/// Returns the number of waves it took. Peers equal to the origin are
/// skipped.
pub fn gossip(
    hub: &CommHub,
    origin: &AgentId,
    peers: &[AgentId],
    topic: &TopicName,
    value: &Value,
    fanout: usize,
) -> HubResult<usize> {
    if fanout == 0 {
        return Err(HubError::Protocol {
            message: "gossip requires a fanout of at least one".to_string(),
        });
    }

    let mut remaining: Vec<AgentId> = peers.iter().filter(|p| *p != origin).cloned().collect();
    remaining.dedup();
    let mut informed: Vec<AgentId> = vec![origin.clone()];
    let mut waves = 0;

    while !remaining.is_empty() {
        waves += 1;
        let capacity = informed.len() * fanout;
        let wave: Vec<AgentId> = remaining
            .drain(..capacity.min(remaining.len()))
            .collect();

        for (index, peer) in wave.iter().enumerate() {
            let sender = &informed[index / fanout];
            let draft = EnvelopeDraft::new(
                sender.clone(),
                Recipient::Agent(peer.clone()),
                topic.clone(),
                value.clone(),
            );
            hub.send(draft)?;
        }
        debug!(wave = waves, newly_informed = wave.len(), "gossip wave");
        informed.extend(wave);
    }
    Ok(waves)
}
