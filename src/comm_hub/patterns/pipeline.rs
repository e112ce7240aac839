//! Pipeline: thread a value through a sequence of agents
//!
//! Each stage is one request; the reply payload becomes the next stage's
//! input. The first failing stage aborts the pipeline.

use serde_json::Value;
use std::time::Duration;
use tracing::trace;

use crate::comm_hub::domain_types::{AgentId, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::HubResult;

/// Runs `input` through `stages` in order, returning the final payload
///
/// An empty stage list returns the input unchanged. `stage_timeout` bounds
/// each stage individually.
pub async fn pipeline(
    hub: &CommHub,
    coordinator: &AgentId,
    stages: &[AgentId],
    topic: &TopicName,
    input: Value,
    stage_timeout: Option<Duration>,
) -> HubResult<Value> {
    let mut current = input;
    for (index, stage) in stages.iter().enumerate() {
        trace!(stage = %stage, index, "pipeline stage");
        let reply = hub
            .request(stage, topic, current, coordinator, stage_timeout)
            .await?;
        current = reply.payload;
    }
    Ok(current)
}
