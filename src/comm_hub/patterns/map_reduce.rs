//! Map-reduce: fan the inputs over mappers, then one request to the reducer
//!
//! Inputs are assigned round-robin over the mapper set and mapped
//! concurrently; the reducer receives the mapped outputs in input order as a
//! single array payload.

use futures::future::join_all;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::comm_hub::domain_types::{AgentId, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::{HubError, HubResult};

/// Maps `inputs` over `mappers` and reduces the outputs through `reducer`
pub async fn map_reduce(
    hub: &CommHub,
    coordinator: &AgentId,
    inputs: Vec<Value>,
    mappers: &[AgentId],
    reducer: &AgentId,
    map_topic: &TopicName,
    reduce_topic: &TopicName,
    timeout: Option<Duration>,
) -> HubResult<Value> {
    if mappers.is_empty() {
        return Err(HubError::Protocol {
            message: "map-reduce requires at least one mapper".to_string(),
        });
    }

    debug!(inputs = inputs.len(), mappers = mappers.len(), "map stage");
    let map_calls = inputs.into_iter().enumerate().map(|(index, input)| {
        let mapper = &mappers[index % mappers.len()];
        async move {
            hub.request(mapper, map_topic, input, coordinator, timeout)
                .await
                .map(|reply| reply.payload)
        }
    });

    let mapped: HubResult<Vec<Value>> = join_all(map_calls).await.into_iter().collect();
    let mapped = mapped?;

    let reply = hub
        .request(
            reducer,
            reduce_topic,
            Value::Array(mapped),
            coordinator,
            timeout,
        )
        .await?;
    Ok(reply.payload)
}
