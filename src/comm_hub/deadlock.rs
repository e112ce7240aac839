//! Wait-for-graph deadlock detection and forced resolution
//!
//! Works from a read-only snapshot of the lock table: every lock with
//! holder H and waiter W contributes an edge `W -> H`. A depth-first search
//! with a recursion stack finds a cycle; the victim is the cycle member
//! closest to natural expiration (smallest aggregate remaining TTL over its
//! held locks), with a lexicographic agent-id tiebreak. Resolution
//! force-releases every lock the victim holds; what happens to the victim's
//! work is the caller's decision.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::domain_types::{AgentId, DeadlockInfo, DeadlockResolution, LockInfo, ResourceName};
use super::locks::LockManager;
use crate::time_provider::SharedTimeProvider;

/// Detector over a [`LockManager`]'s wait-for graph
#[derive(Debug)]
pub struct DeadlockDetector {
    locks: Arc<LockManager>,
    time: SharedTimeProvider,
}

impl DeadlockDetector {
    /// Creates a detector reading from `locks`
    #[must_use]
    pub fn new(locks: Arc<LockManager>, time: SharedTimeProvider) -> Self {
        Self { locks, time }
    }

    /// Searches the current wait-for graph for a cycle
    ///
    /// Returns the first cycle found, as `[A0, A1, ..., Ak-1, A0]`, along
    /// with the resources whose holder and waiters are both inside it.
    #[must_use]
    pub fn detect(&self) -> Option<DeadlockInfo> {
        let snapshot = self.locks.snapshot();
        let cycle = find_cycle(&build_wait_for_graph(&snapshot))?;
        let members: HashSet<&AgentId> = cycle.iter().collect();

        let resources: Vec<ResourceName> = snapshot
            .iter()
            .filter(|lock| {
                members.contains(&lock.holder)
                    && lock.waiters.iter().any(|waiter| members.contains(waiter))
            })
            .map(|lock| lock.resource.clone())
            .collect();

        let mut closed = cycle;
        if let Some(first) = closed.first().cloned() {
            closed.push(first);
        }
        warn!(cycle = ?closed, "deadlock detected");
        Some(DeadlockInfo {
            cycle: closed,
            resources,
        })
    }

    /// Picks the victim for a detected cycle
    ///
    /// The victim is the member whose held locks have the smallest aggregate
    /// remaining lifetime; ties break lexicographically by agent id.
    #[must_use]
    pub fn select_victim(&self, info: &DeadlockInfo) -> Option<AgentId> {
        let snapshot = self.locks.snapshot();
        let now = self.time.epoch_millis();
        let mut members: Vec<&AgentId> = info.cycle.iter().collect();
        members.dedup();

        members
            .into_iter()
            .map(|agent| {
                let remaining: u64 = snapshot
                    .iter()
                    .filter(|lock| lock.holder == *agent)
                    .map(|lock| lock.expires_at.saturating_sub(now))
                    .sum();
                (remaining, agent.clone())
            })
            .min()
            .map(|(_, agent)| agent)
    }

    /// Breaks a detected cycle by force-releasing every lock the victim holds
    pub fn resolve(&self, info: DeadlockInfo) -> Option<DeadlockResolution> {
        let victim = self.select_victim(&info)?;
        let held: Vec<LockInfo> = self
            .locks
            .snapshot()
            .into_iter()
            .filter(|lock| lock.holder == victim)
            .collect();

        let mut released = Vec::new();
        for lock in held {
            if self.locks.force_release(&lock.resource).is_ok() {
                released.push(lock.resource);
            }
        }
        info!(%victim, released = released.len(), "deadlock resolved");
        Some(DeadlockResolution {
            info,
            victim,
            released,
        })
    }

    /// Convenience pass: detect a cycle and resolve it if one exists
    pub fn detect_and_resolve(&self) -> Option<DeadlockResolution> {
        let info = self.detect()?;
        debug!(resources = info.resources.len(), "resolving detected cycle");
        self.resolve(info)
    }
}

fn build_wait_for_graph(snapshot: &[LockInfo]) -> HashMap<AgentId, Vec<AgentId>> {
    let mut graph: HashMap<AgentId, Vec<AgentId>> = HashMap::new();
    for lock in snapshot {
        for waiter in &lock.waiters {
            graph
                .entry(waiter.clone())
                .or_default()
                .push(lock.holder.clone());
        }
        graph.entry(lock.holder.clone()).or_default();
    }
    graph
}

/// DFS with an explicit recursion stack; returns the cycle without the
/// closing repeat of its first node.
fn find_cycle(graph: &HashMap<AgentId, Vec<AgentId>>) -> Option<Vec<AgentId>> {
    let mut visited: HashSet<&AgentId> = HashSet::new();

    // Deterministic iteration keeps detection stable across runs.
    let mut roots: Vec<&AgentId> = graph.keys().collect();
    roots.sort();

    for root in roots {
        if visited.contains(root) {
            continue;
        }
        let mut on_stack: Vec<&AgentId> = Vec::new();
        if let Some(cycle) = dfs(root, graph, &mut visited, &mut on_stack) {
            return Some(cycle);
        }
    }
    None
}

fn dfs<'a>(
    node: &'a AgentId,
    graph: &'a HashMap<AgentId, Vec<AgentId>>,
    visited: &mut HashSet<&'a AgentId>,
    on_stack: &mut Vec<&'a AgentId>,
) -> Option<Vec<AgentId>> {
    if let Some(start) = on_stack.iter().position(|seen| *seen == node) {
        return Some(on_stack[start..].iter().map(|id| (*id).clone()).collect());
    }
    if visited.contains(node) {
        return None;
    }

    visited.insert(node);
    on_stack.push(node);
    if let Some(next) = graph.get(node) {
        for neighbor in next {
            if let Some(cycle) = dfs(neighbor, graph, visited, on_stack) {
                return Some(cycle);
            }
        }
    }
    on_stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::production_time_provider;
    use std::time::Duration;

    fn resource(name: &str) -> ResourceName {
        ResourceName::try_new(name).unwrap()
    }

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    fn fixture() -> (Arc<LockManager>, DeadlockDetector) {
        let locks = Arc::new(LockManager::new(
            30_000,
            Duration::from_secs(5),
            production_time_provider(),
        ));
        let detector = DeadlockDetector::new(Arc::clone(&locks), production_time_provider());
        (locks, detector)
    }

    #[tokio::test]
    async fn no_contention_means_no_cycle() {
        let (locks, detector) = fixture();
        locks.acquire(&resource("r1"), &agent("a"), None).await.unwrap();
        locks.acquire(&resource("r2"), &agent("b"), None).await.unwrap();
        assert!(detector.detect().is_none());
    }

    #[tokio::test]
    async fn two_agent_cross_wait_forms_a_cycle() {
        let (locks, detector) = fixture();
        locks.acquire(&resource("r1"), &agent("a"), None).await.unwrap();
        locks.acquire(&resource("r2"), &agent("b"), None).await.unwrap();

        let cross_a = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks.acquire(&resource("r2"), &agent("a"), Some(Duration::from_secs(2))).await
            })
        };
        let cross_b = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks.acquire(&resource("r1"), &agent("b"), Some(Duration::from_secs(2))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = detector.detect().expect("cycle should be found");
        assert_eq!(info.cycle.len(), 3);
        assert_eq!(info.cycle.first(), info.cycle.last());
        assert_eq!(info.resources.len(), 2);

        let resolution = detector.resolve(info).expect("victim should be selected");
        // Equal remaining TTLs tie-break lexicographically.
        assert_eq!(resolution.victim, agent("a"));

        // b waited on the victim's lock and is unblocked by the forced
        // release; a keeps waiting on r2 and times out.
        let b_result = cross_b.await.unwrap();
        assert!(b_result.is_ok());
        let a_result = cross_a.await.unwrap();
        assert!(a_result.is_err());
    }

    #[tokio::test]
    async fn three_agent_ring_is_detected() {
        let (locks, detector) = fixture();
        for (resource_name, holder) in [("r1", "a"), ("r2", "b"), ("r3", "c")] {
            locks
                .acquire(&resource(resource_name), &agent(holder), None)
                .await
                .unwrap();
        }

        let mut pending = Vec::new();
        for (resource_name, waiter) in [("r2", "a"), ("r3", "b"), ("r1", "c")] {
            let locks = Arc::clone(&locks);
            pending.push(tokio::spawn(async move {
                locks
                    .acquire(&resource(resource_name), &agent(waiter), Some(Duration::from_secs(2)))
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = detector.detect().expect("ring should be found");
        assert_eq!(info.cycle.len(), 4);

        let resolution = detector.detect_and_resolve().expect("ring should resolve");
        assert!(!resolution.released.is_empty());
        locks.dispose();
        for handle in pending {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn waiting_without_a_cycle_is_not_a_deadlock() {
        let (locks, detector) = fixture();
        locks.acquire(&resource("r1"), &agent("a"), None).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks.acquire(&resource("r1"), &agent("b"), Some(Duration::from_millis(200))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(detector.detect().is_none());
        let _ = waiter.await;
    }
}
