//! Fan-out: broadcast a task and aggregate one result per worker
//!
//! A collector sized to the worker set is created first, then a response
//! subscription, then the task broadcast, so responses arriving during the
//! broadcast itself are already captured.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::comm_hub::domain_types::{AgentId, CollectorOutcome, Envelope, TopicName};
use crate::comm_hub::hub::CommHub;
use crate::comm_hub::traits::{HubError, HubResult, MessageHandler};

/// Topics and deadline for a fan-out round
#[derive(Debug, Clone)]
pub struct FanOutOptions {
    /// Topic the task is broadcast on
    pub task_topic: TopicName,
    /// Topic workers answer on
    pub response_topic: TopicName,
    /// Overall deadline for the aggregation
    pub timeout: Option<Duration>,
}

/// Broadcasts `task` to `workers` and waits for one submission per worker
///
/// A response envelope whose payload carries an `"error"` key counts as a
/// failed submission; everything else counts as a success. Responses from
/// agents outside the worker set are ignored.
pub async fn fan_out(
    hub: &Arc<CommHub>,
    coordinator: &AgentId,
    task: Value,
    workers: &[AgentId],
    options: FanOutOptions,
) -> HubResult<CollectorOutcome> {
    if workers.is_empty() {
        return Err(HubError::Protocol {
            message: "fan-out requires at least one worker".to_string(),
        });
    }

    let collector = hub.memory().create_collector(workers.len())?;
    let expected: HashSet<AgentId> = workers.iter().cloned().collect();

    let submitting_hub = Arc::clone(hub);
    let handler: MessageHandler = Arc::new(move |envelope: &Envelope| {
        if !expected.contains(&envelope.from) {
            return;
        }
        let outcome = match envelope.payload.get("error").and_then(Value::as_str) {
            Some(error) => submitting_hub
                .memory()
                .submit_error(collector, &envelope.from, error),
            None => submitting_hub
                .memory()
                .submit_result(collector, &envelope.from, envelope.payload.clone()),
        };
        if let Err(err) = outcome {
            debug!(%err, "fan-out response arrived after aggregation ended");
        }
    });

    let subscription = hub.subscribe(coordinator, &options.response_topic, handler)?;
    hub.broadcast(coordinator, &options.task_topic, task)?;

    let outcome = hub.memory().wait_for_all(collector, options.timeout).await;
    subscription.unsubscribe();
    let _ = hub.memory().remove_collector(collector);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm_hub::config::HubConfig;
    use serde_json::json;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    fn topic(name: &str) -> TopicName {
        TopicName::try_new(name).unwrap()
    }

    fn test_hub() -> Arc<CommHub> {
        let config = HubConfig::builder().enable_sweep(false).build().unwrap();
        Arc::new(CommHub::new(config))
    }

    fn spawn_worker(hub: &Arc<CommHub>, name: &str, fails: bool) {
        let worker = agent(name);
        let responder = Arc::clone(hub);
        let from = worker.clone();
        let handler: MessageHandler = Arc::new(move |envelope: &Envelope| {
            let payload = if fails {
                json!({ "error": "worker exploded" })
            } else {
                json!({ "worker": from.to_string(), "input": envelope.payload })
            };
            responder
                .broadcast(&from, &topic("results"), payload)
                .unwrap();
        });
        hub.subscribe(&worker, &topic("tasks"), handler).unwrap();
    }

    #[tokio::test]
    async fn aggregates_one_result_per_worker() {
        let hub = test_hub();
        spawn_worker(&hub, "w1", false);
        spawn_worker(&hub, "w2", false);

        let outcome = fan_out(
            &hub,
            &agent("boss"),
            json!("crunch"),
            &[agent("w1"), agent("w2")],
            FanOutOptions {
                task_topic: topic("tasks"),
                response_topic: topic("results"),
                timeout: Some(Duration::from_secs(2)),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.errors.is_empty());
        hub.destroy();
    }

    #[tokio::test]
    async fn worker_errors_count_toward_completion() {
        let hub = test_hub();
        spawn_worker(&hub, "w1", false);
        spawn_worker(&hub, "w2", true);

        let outcome = fan_out(
            &hub,
            &agent("boss"),
            json!("crunch"),
            &[agent("w1"), agent("w2")],
            FanOutOptions {
                task_topic: topic("tasks"),
                response_topic: topic("results"),
                timeout: Some(Duration::from_secs(2)),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.errors[&agent("w2")], "worker exploded");
        hub.destroy();
    }

    #[tokio::test]
    async fn missing_worker_times_the_round_out() {
        let hub = test_hub();
        spawn_worker(&hub, "w1", false);

        let err = fan_out(
            &hub,
            &agent("boss"),
            json!("crunch"),
            &[agent("w1"), agent("ghost")],
            FanOutOptions {
                task_topic: topic("tasks"),
                response_topic: topic("results"),
                timeout: Some(Duration::from_millis(50)),
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        hub.destroy();
    }
}
