//! Property-based tests for the kernel's universal invariants.
//!
//! Each property drives the public surface under a fresh Tokio runtime per
//! case; the case counts are kept small because several properties stage
//! real waiter queues with short sleeps.

use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sutra::{
    AccessList, AgentId, BarrierName, CommHub, HubConfig, MessageHandler, RegionName,
    ResourceName, SemaphoreName, TopicName,
};

fn agent(name: &str) -> AgentId {
    AgentId::try_new(name).unwrap()
}

fn test_hub() -> Arc<CommHub> {
    let config = HubConfig::builder().enable_sweep(false).build().unwrap();
    Arc::new(CommHub::new(config))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// After K successful writes, `version == K`, regardless of key reuse.
    #[test]
    fn region_writes_never_lose_a_version(keys in proptest::collection::vec("[a-z]{1,6}", 1..24)) {
        runtime().block_on(async move {
            let hub = test_hub();
            let name = RegionName::try_new("props").unwrap();
            hub.memory()
                .create_region(&name, &agent("owner"), AccessList::Public, None, None)
                .unwrap();

            for (index, key) in keys.iter().enumerate() {
                let version = hub
                    .memory()
                    .write(&name, key, json!(index), &agent("writer"))
                    .unwrap();
                prop_assert_eq!(version, index as u64 + 1);
            }
            prop_assert_eq!(
                hub.memory().region_info(&name).unwrap().version,
                keys.len() as u64
            );
            Ok(())
        })?;
    }

    /// Lock grants follow enqueue order exactly, for any contender count.
    #[test]
    fn lock_grants_follow_arrival_order(contenders in 2usize..6) {
        runtime().block_on(async move {
            let hub = test_hub();
            let resource = ResourceName::try_new("contended").unwrap();
            hub.locks().acquire(&resource, &agent("holder"), None).await.unwrap();

            let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
            let mut handles = Vec::new();
            for index in 0..contenders {
                let hub = Arc::clone(&hub);
                let order_tx = order_tx.clone();
                let resource = resource.clone();
                handles.push(tokio::spawn(async move {
                    let name = format!("waiter-{index}");
                    hub.locks()
                        .acquire(&resource, &agent(&name), Some(Duration::from_secs(5)))
                        .await
                        .unwrap();
                    order_tx.send(index).unwrap();
                    hub.locks().release(&resource, &agent(&name)).unwrap();
                }));
                tokio::time::sleep(Duration::from_millis(15)).await;
            }

            hub.locks().release(&resource, &agent("holder")).unwrap();
            for handle in handles {
                handle.await.unwrap();
            }

            let mut grants = Vec::new();
            while let Ok(index) = order_rx.try_recv() {
                grants.push(index);
            }
            let expected: Vec<usize> = (0..contenders).collect();
            prop_assert_eq!(grants, expected);
            Ok(())
        })?;
    }

    /// A holder's re-acquire completes immediately and consumes no queue slot.
    #[test]
    fn reacquire_is_reentrant(repeats in 1usize..8) {
        runtime().block_on(async move {
            let hub = test_hub();
            let resource = ResourceName::try_new("reentrant").unwrap();
            let holder = agent("holder");

            let first = hub.locks().acquire(&resource, &holder, None).await.unwrap();
            for _ in 0..repeats {
                let again = hub.locks().acquire(&resource, &holder, None).await.unwrap();
                prop_assert_eq!(again.acquired_at, first.acquired_at);
                prop_assert!(again.waiters.is_empty());
            }
            Ok(())
        })?;
    }

    /// Every observer sees the same results map: exactly the successes.
    #[test]
    fn collector_resolves_all_observers_identically(outcomes in proptest::collection::vec(any::<bool>(), 1..10)) {
        runtime().block_on(async move {
            let hub = test_hub();
            let expected = outcomes.len();
            let collector = hub.memory().create_collector(expected).unwrap();

            let mut observers = Vec::new();
            for _ in 0..3 {
                let hub = Arc::clone(&hub);
                observers.push(tokio::spawn(async move {
                    hub.memory()
                        .wait_for_all(collector, Some(Duration::from_secs(5)))
                        .await
                }));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;

            let successes = outcomes.iter().filter(|ok| **ok).count();
            for (index, ok) in outcomes.iter().enumerate() {
                let submitter = agent(&format!("s{index}"));
                if *ok {
                    hub.memory().submit_result(collector, &submitter, json!(index)).unwrap();
                } else {
                    hub.memory().submit_error(collector, &submitter, "nope").unwrap();
                }
            }

            for observer in observers {
                let outcome = observer.await.unwrap().unwrap();
                prop_assert_eq!(outcome.results.len(), successes);
                prop_assert_eq!(outcome.errors.len(), expected - successes);
            }
            Ok(())
        })?;
    }

    /// The sender's own subscription is never invoked by its broadcast.
    #[test]
    fn broadcast_excludes_the_sender(subscribers in 1usize..6, sender_index in 0usize..6) {
        runtime().block_on(async move {
            let hub = test_hub();
            let topic = TopicName::try_new("fanout").unwrap();
            let sender_index = sender_index % subscribers;

            let counters: Vec<Arc<Mutex<usize>>> =
                (0..subscribers).map(|_| Arc::new(Mutex::new(0))).collect();
            for (index, counter) in counters.iter().enumerate() {
                let sink = Arc::clone(counter);
                let handler: MessageHandler = Arc::new(move |_envelope| {
                    *sink.lock().unwrap() += 1;
                });
                hub.subscribe(&agent(&format!("sub-{index}")), &topic, handler).unwrap();
            }

            let sender = agent(&format!("sub-{sender_index}"));
            hub.broadcast(&sender, &topic, json!("news")).unwrap();

            for (index, counter) in counters.iter().enumerate() {
                let expected = usize::from(index != sender_index);
                prop_assert_eq!(*counter.lock().unwrap(), expected);
            }
            Ok(())
        })?;
    }

    /// After the Nth distinct arrival, blocked and future arrivals complete.
    #[test]
    fn barrier_releases_all_once_quorum_arrives(required in 1usize..6) {
        runtime().block_on(async move {
            let hub = test_hub();
            let name = BarrierName::try_new("quorum").unwrap();
            hub.barriers().create(&name, required).unwrap();

            let mut early = Vec::new();
            for index in 0..required.saturating_sub(1) {
                let hub = Arc::clone(&hub);
                let name = name.clone();
                early.push(tokio::spawn(async move {
                    hub.barriers().arrive(&name, &agent(&format!("early-{index}"))).await
                }));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;

            hub.barriers().arrive(&name, &agent("closer")).await.unwrap();
            for handle in early {
                handle.await.unwrap().unwrap();
            }
            // Late arrivals return immediately.
            hub.barriers().arrive(&name, &agent("late")).await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Strict semaphore fairness: a single circulating permit is handed to
    /// contenders in exactly their arrival order.
    #[test]
    fn semaphore_handoff_is_fifo(contenders in 2usize..5) {
        runtime().block_on(async move {
            let hub = test_hub();
            let name = SemaphoreName::try_new("pool").unwrap();
            hub.semaphores().create(&name, 1).unwrap();
            hub.semaphores().acquire(&name, &agent("initial"), None).await.unwrap();

            let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
            let mut handles = Vec::new();
            for index in 0..contenders {
                let hub = Arc::clone(&hub);
                let order_tx = order_tx.clone();
                let name = name.clone();
                handles.push(tokio::spawn(async move {
                    hub.semaphores()
                        .acquire(&name, &agent(&format!("waiter-{index}")), Some(Duration::from_secs(5)))
                        .await
                        .unwrap();
                    order_tx.send(index).unwrap();
                    hub.semaphores()
                        .release(&name, &agent(&format!("waiter-{index}")))
                        .unwrap();
                }));
                tokio::time::sleep(Duration::from_millis(15)).await;
            }

            hub.semaphores().release(&name, &agent("initial")).unwrap();
            for handle in handles {
                handle.await.unwrap();
            }

            let mut grants = Vec::new();
            while let Ok(index) = order_rx.try_recv() {
                grants.push(index);
            }
            let expected: Vec<usize> = (0..contenders).collect();
            prop_assert_eq!(grants, expected);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn concurrent_writers_still_produce_a_dense_version_sequence() {
    let hub = test_hub();
    let name = RegionName::try_new("contended").unwrap();
    hub.memory()
        .create_region(&name, &agent("owner"), AccessList::Public, None, None)
        .unwrap();

    let mut handles = Vec::new();
    for writer in 0..8 {
        let hub = Arc::clone(&hub);
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..25 {
                hub.memory()
                    .write(
                        &name,
                        &format!("w{writer}-r{round}"),
                        json!(round),
                        &agent(&format!("writer-{writer}")),
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(hub.memory().region_info(&name).unwrap().version, 8 * 25);
}

#[tokio::test]
async fn destroy_twice_is_safe_and_final() {
    let hub = test_hub();
    hub.destroy();
    hub.destroy();
    assert!(hub.is_destroyed());
    assert!(hub.get_stats().is_err());
}
