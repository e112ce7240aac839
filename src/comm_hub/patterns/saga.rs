//! Saga: ordered steps with compensating actions on failure
//!
//! Steps run sequentially, each as one request. When a step fails, the
//! compensations of every previously successful step run in reverse order;
//! a failing compensation is logged and does not stop the remaining ones.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::comm_hub::domain_types::{AgentId, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::HubResult;

/// One saga step: an action and the compensation that undoes it
#[derive(Debug, Clone)]
pub struct SagaStep {
    /// Step name, for logs only
    pub name: String,
    /// Agent the action and compensation are addressed to
    pub agent: AgentId,
    /// Action payload
    pub action: Value,
    /// Compensation payload, sent if a later step fails
    pub compensation: Value,
}

/// Executes `steps` in order, compensating on the first failure
///
/// Returns the step reply payloads on full success; on failure, returns the
/// failing step's error after running prior compensations in reverse.
pub async fn saga(
    hub: &CommHub,
    coordinator: &AgentId,
    steps: &[SagaStep],
    topic: &TopicName,
    step_timeout: Option<Duration>,
) -> HubResult<Vec<Value>> {
    let mut outputs = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        debug!(step = %step.name, "saga step");
        match hub
            .request(&step.agent, topic, step.action.clone(), coordinator, step_timeout)
            .await
        {
            Ok(reply) => outputs.push(reply.payload),
            Err(err) => {
                warn!(step = %step.name, %err, "saga step failed; compensating");
                for done in steps[..index].iter().rev() {
                    if let Err(comp_err) = hub
                        .request(
                            &done.agent,
                            topic,
                            done.compensation.clone(),
                            coordinator,
                            step_timeout,
                        )
                        .await
                    {
                        warn!(step = %done.name, %comp_err, "compensation failed; continuing");
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(outputs)
}
