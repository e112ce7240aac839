//! Versioned key-value regions with ACLs, TTLs, and watchers, plus result
//! collectors for aggregating parallel work
//!
//! Region writes are linearizable per region: every successful write
//! increments `version` by exactly one and watchers observe writes in write
//! order. There is no compare-and-swap primitive; clients needing CAS read
//! the current version and retry at a higher layer.
//!
//! Watchers run synchronously inside `write` but outside the region's
//! critical section, through the central callback helper, so a panicking
//! watcher never affects the write or other watchers.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::callbacks::invoke_user_callback;
use super::domain_types::{AccessList, AgentId, CollectorId, CollectorOutcome, RegionInfo, RegionName};
use super::traits::{HubError, HubResult, PrimitiveKind, RegionWatcher};
use crate::time_provider::SharedTimeProvider;

struct RegionEntry {
    owner: AgentId,
    data: HashMap<String, Value>,
    version: u64,
    access: AccessList,
    created_at: u64,
    updated_at: u64,
    ttl: Option<u64>,
    max_size: Option<usize>,
    watchers: Vec<(u64, RegionWatcher)>,
}

impl RegionEntry {
    fn info(&self, name: &RegionName) -> RegionInfo {
        RegionInfo {
            name: name.clone(),
            owner: self.owner.clone(),
            version: self.version,
            len: self.data.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            ttl: self.ttl,
            max_size: self.max_size,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.ttl
            .is_some_and(|ttl| self.updated_at.saturating_add(ttl) <= now_ms)
    }
}

struct CollectorEntry {
    expected: usize,
    results: HashMap<AgentId, Value>,
    errors: HashMap<AgentId, String>,
    waiters: Vec<(u64, oneshot::Sender<CollectorOutcome>)>,
    completed: bool,
}

impl CollectorEntry {
    fn outcome(&self) -> CollectorOutcome {
        CollectorOutcome {
            results: self.results.clone(),
            errors: self.errors.clone(),
        }
    }

    fn submissions(&self) -> usize {
        self.results.len() + self.errors.len()
    }
}

/// Unsubscribe handle for a region watcher
///
/// Dropping the handle keeps the watcher registered; call
/// [`unsubscribe`](RegionWatch::unsubscribe) to remove it.
#[derive(Debug)]
pub struct RegionWatch {
    regions: Weak<DashMap<RegionName, RegionEntry>>,
    name: RegionName,
    token: u64,
}

impl RegionWatch {
    /// Removes the watcher from its region
    ///
    /// A no-op when the region or the manager is already gone.
    pub fn unsubscribe(self) {
        if let Some(regions) = self.regions.upgrade() {
            if let Some(mut entry) = regions.get_mut(&self.name) {
                entry.watchers.retain(|(token, _)| *token != self.token);
            }
        }
    }
}

/// Manager for shared-memory regions and result collectors
pub struct SharedMemoryManager {
    regions: Arc<DashMap<RegionName, RegionEntry>>,
    collectors: DashMap<CollectorId, CollectorEntry>,
    default_timeout: Duration,
    next_token: AtomicU64,
    disposed: AtomicBool,
    time: SharedTimeProvider,
}

impl SharedMemoryManager {
    /// Creates a shared-memory manager
    #[must_use]
    pub fn new(default_timeout: Duration, time: SharedTimeProvider) -> Self {
        Self {
            regions: Arc::new(DashMap::new()),
            collectors: DashMap::new(),
            default_timeout,
            next_token: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            time,
        }
    }

    /// Creates a region owned by `owner`
    ///
    /// `ttl_ms` measures from the last write; `max_size` caps the number of
    /// distinct keys.
    pub fn create_region(
        &self,
        name: &RegionName,
        owner: &AgentId,
        access: AccessList,
        ttl_ms: Option<u64>,
        max_size: Option<usize>,
    ) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        match self.regions.entry(name.clone()) {
            Entry::Occupied(_) => Err(HubError::Duplicate {
                kind: PrimitiveKind::Region,
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let now = self.time.epoch_millis();
                slot.insert(RegionEntry {
                    owner: owner.clone(),
                    data: HashMap::new(),
                    version: 0,
                    access,
                    created_at: now,
                    updated_at: now,
                    ttl: ttl_ms,
                    max_size,
                    watchers: Vec::new(),
                });
                debug!(%name, %owner, "region created");
                Ok(())
            }
        }
    }

    /// Reads the current value of `key`, `None` when absent
    pub fn read(&self, name: &RegionName, key: &str) -> HubResult<Option<Value>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        let entry = self.regions.get(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Region,
            name: name.to_string(),
        })?;
        Ok(entry.data.get(key).cloned())
    }

    /// Writes `key = value` on behalf of `agent`, returning the new version
    ///
    /// Fails `Denied` when the agent is not on the access list and `Full`
    /// when the write would insert a new key past `max_size`. Watchers are
    /// invoked synchronously with `(key, value, version)` after the write;
    /// a watcher failure is swallowed and does not affect the write.
    pub fn write(
        &self,
        name: &RegionName,
        key: &str,
        value: Value,
        agent: &AgentId,
    ) -> HubResult<u64> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let (version, watchers) = {
            let mut entry = self.regions.get_mut(name).ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Region,
                name: name.to_string(),
            })?;

            if !entry.access.allows(agent) {
                return Err(HubError::Denied {
                    agent: agent.clone(),
                    action: "write".to_string(),
                    resource: format!("region:{name}"),
                });
            }

            let inserting = !entry.data.contains_key(key);
            if inserting {
                if let Some(max_size) = entry.max_size {
                    if entry.data.len() >= max_size {
                        return Err(HubError::Full {
                            subject: format!("region:{name}"),
                            limit: max_size,
                        });
                    }
                }
            }

            entry.data.insert(key.to_string(), value.clone());
            entry.version += 1;
            entry.updated_at = self.time.epoch_millis();
            trace!(%name, key, version = entry.version, %agent, "region write");
            (entry.version, entry.watchers.clone())
        };

        for (_, watcher) in watchers {
            invoke_user_callback("region watcher", || watcher(key, &value, version));
        }
        Ok(version)
    }

    /// Deletes a region; only the owner may do so
    pub fn delete_region(&self, name: &RegionName, agent: &AgentId) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        let entry = self.regions.get(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Region,
            name: name.to_string(),
        })?;
        if entry.owner != *agent {
            return Err(HubError::Denied {
                agent: agent.clone(),
                action: "delete".to_string(),
                resource: format!("region:{name}"),
            });
        }
        drop(entry);
        self.regions.remove(name);
        debug!(%name, %agent, "region deleted");
        Ok(())
    }

    /// Registers a change watcher, returning its unsubscribe handle
    pub fn watch_region(
        &self,
        name: &RegionName,
        watcher: RegionWatcher,
    ) -> HubResult<RegionWatch> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        let mut entry = self.regions.get_mut(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Region,
            name: name.to_string(),
        })?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        entry.watchers.push((token, watcher));
        Ok(RegionWatch {
            regions: Arc::downgrade(&self.regions),
            name: name.clone(),
            token,
        })
    }

    /// Metadata snapshot of a region
    pub fn region_info(&self, name: &RegionName) -> HubResult<RegionInfo> {
        let entry = self.regions.get(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Region,
            name: name.to_string(),
        })?;
        Ok(entry.info(name))
    }

    /// Removes regions whose TTL has elapsed since their last write
    pub fn cleanup_regions(&self) -> Vec<RegionName> {
        let now = self.time.epoch_millis();
        let expired: Vec<RegionName> = self
            .regions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for name in &expired {
            self.regions.remove(name);
            debug!(%name, "expired region evicted");
        }
        expired
    }

    /// Number of regions that exist
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Creates a collector expecting `expected` submissions
    pub fn create_collector(&self, expected: usize) -> HubResult<CollectorId> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        if expected == 0 {
            return Err(HubError::Protocol {
                message: "collector requires at least one expected result".to_string(),
            });
        }
        let id = CollectorId::generate();
        self.collectors.insert(
            id,
            CollectorEntry {
                expected,
                results: HashMap::new(),
                errors: HashMap::new(),
                waiters: Vec::new(),
                completed: false,
            },
        );
        debug!(%id, expected, "collector created");
        Ok(id)
    }

    /// Records a successful result from `agent`
    ///
    /// Completion resolves every observer with the same outcome. A
    /// submission after completion is ignored.
    pub fn submit_result(&self, id: CollectorId, agent: &AgentId, value: Value) -> HubResult<()> {
        self.submit(id, agent, Ok(value))
    }

    /// Records a failed result from `agent`; errors count toward completion
    pub fn submit_error(
        &self,
        id: CollectorId,
        agent: &AgentId,
        error: impl Into<String>,
    ) -> HubResult<()> {
        self.submit(id, agent, Err(error.into()))
    }

    fn submit(
        &self,
        id: CollectorId,
        agent: &AgentId,
        submission: Result<Value, String>,
    ) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        let mut entry = self.collectors.get_mut(&id).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Collector,
            name: id.to_string(),
        })?;

        if entry.completed {
            trace!(%id, %agent, "submission after completion ignored");
            return Ok(());
        }

        match submission {
            Ok(value) => {
                entry.results.insert(agent.clone(), value);
            }
            Err(error) => {
                entry.errors.insert(agent.clone(), error);
            }
        }

        if entry.submissions() >= entry.expected {
            entry.completed = true;
            let outcome = entry.outcome();
            let waiters = std::mem::take(&mut entry.waiters);
            drop(entry);
            debug!(%id, "collector completed");
            for (_, waiter) in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        Ok(())
    }

    /// Waits until the collector completes, returning the aggregated outcome
    ///
    /// Observers registered before completion and late observers all see the
    /// same maps.
    pub async fn wait_for_all(
        &self,
        id: CollectorId,
        timeout: Option<Duration>,
    ) -> HubResult<CollectorOutcome> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let wait = timeout.unwrap_or(self.default_timeout);
        let token;
        let mut outcome_rx;

        {
            let mut entry = self.collectors.get_mut(&id).ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Collector,
                name: id.to_string(),
            })?;
            if entry.completed {
                return Ok(entry.outcome());
            }
            let (tx, rx) = oneshot::channel();
            token = self.next_token.fetch_add(1, Ordering::Relaxed);
            entry.waiters.push((token, tx));
            outcome_rx = rx;
        }

        match tokio::time::timeout(wait, &mut outcome_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(HubError::Cancelled {
                resource: format!("collector:{id}"),
            }),
            Err(_) => {
                if let Some(mut entry) = self.collectors.get_mut(&id) {
                    entry.waiters.retain(|(t, _)| *t != token);
                }
                match outcome_rx.try_recv() {
                    Ok(outcome) => Ok(outcome),
                    Err(_) => Err(HubError::Timeout {
                        resource: format!("collector:{id}"),
                        waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            }
        }
    }

    /// Drops a collector regardless of state
    pub fn remove_collector(&self, id: CollectorId) -> HubResult<()> {
        self.collectors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Collector,
                name: id.to_string(),
            })
    }

    /// Garbage-collects completed collectors, returning how many were dropped
    pub fn gc_completed_collectors(&self) -> usize {
        let before = self.collectors.len();
        self.collectors.retain(|_, entry| !entry.completed);
        before - self.collectors.len()
    }

    /// Number of collectors not yet garbage-collected
    #[must_use]
    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Cancels all collector observers and clears regions and collectors
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.regions.clear();
        self.collectors.clear();
    }
}

impl std::fmt::Debug for SharedMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryManager")
            .field("regions", &self.region_count())
            .field("collectors", &self.collector_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::production_time_provider;
    use serde_json::json;
    use std::sync::Mutex;

    fn manager() -> SharedMemoryManager {
        SharedMemoryManager::new(Duration::from_secs(5), production_time_provider())
    }

    fn region(name: &str) -> RegionName {
        RegionName::try_new(name).unwrap()
    }

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    #[tokio::test]
    async fn writes_increment_version_by_exactly_one() {
        let memory = manager();
        memory
            .create_region(&region("cfg"), &agent("p"), AccessList::Public, None, None)
            .unwrap();

        for k in 1..=5u64 {
            let version = memory
                .write(&region("cfg"), "key", json!(k), &agent("q"))
                .unwrap();
            assert_eq!(version, k);
        }
        assert_eq!(memory.region_info(&region("cfg")).unwrap().version, 5);
    }

    #[tokio::test]
    async fn write_without_access_is_denied() {
        let memory = manager();
        memory
            .create_region(
                &region("cfg"),
                &agent("p"),
                AccessList::agents([agent("p")]),
                None,
                None,
            )
            .unwrap();

        let err = memory
            .write(&region("cfg"), "k", json!(1), &agent("q"))
            .unwrap_err();
        assert!(matches!(err, HubError::Denied { .. }));
    }

    #[tokio::test]
    async fn max_size_bounds_new_keys_but_not_overwrites() {
        let memory = manager();
        memory
            .create_region(&region("cfg"), &agent("p"), AccessList::Public, None, Some(2))
            .unwrap();

        memory.write(&region("cfg"), "k1", json!(1), &agent("q")).unwrap();
        memory.write(&region("cfg"), "k2", json!(2), &agent("r")).unwrap();
        let err = memory
            .write(&region("cfg"), "k3", json!(3), &agent("s"))
            .unwrap_err();
        assert!(matches!(err, HubError::Full { .. }));

        // Overwriting an existing key is not an insert.
        memory.write(&region("cfg"), "k1", json!(10), &agent("q")).unwrap();
    }

    #[tokio::test]
    async fn watchers_see_each_write_in_order() {
        let memory = manager();
        memory
            .create_region(&region("cfg"), &agent("p"), AccessList::Public, None, None)
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let watch = memory
            .watch_region(
                &region("cfg"),
                Arc::new(move |key, _value, version| {
                    sink.lock().unwrap().push((key.to_string(), version));
                }),
            )
            .unwrap();

        memory.write(&region("cfg"), "a", json!(1), &agent("q")).unwrap();
        memory.write(&region("cfg"), "b", json!(2), &agent("q")).unwrap();

        watch.unsubscribe();
        memory.write(&region("cfg"), "c", json!(3), &agent("q")).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn panicking_watcher_does_not_fail_the_write() {
        let memory = manager();
        memory
            .create_region(&region("cfg"), &agent("p"), AccessList::Public, None, None)
            .unwrap();
        memory
            .watch_region(&region("cfg"), Arc::new(|_, _, _| panic!("watcher bug")))
            .unwrap();

        let version = memory
            .write(&region("cfg"), "k", json!(1), &agent("q"))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn only_owner_may_delete() {
        let memory = manager();
        memory
            .create_region(&region("cfg"), &agent("p"), AccessList::Public, None, None)
            .unwrap();

        let err = memory.delete_region(&region("cfg"), &agent("q")).unwrap_err();
        assert!(matches!(err, HubError::Denied { .. }));

        memory.delete_region(&region("cfg"), &agent("p")).unwrap();
        assert_eq!(memory.region_count(), 0);
    }

    #[tokio::test]
    async fn expired_regions_are_swept() {
        let memory = manager();
        memory
            .create_region(&region("tmp"), &agent("p"), AccessList::Public, Some(10), None)
            .unwrap();
        memory
            .create_region(&region("keep"), &agent("p"), AccessList::Public, None, None)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let evicted = memory.cleanup_regions();
        assert_eq!(evicted, vec![region("tmp")]);
        assert_eq!(memory.region_count(), 1);
    }

    #[tokio::test]
    async fn collector_completes_with_mixed_results_and_errors() {
        let memory = Arc::new(manager());
        let id = memory.create_collector(3).unwrap();

        memory.submit_result(id, &agent("a"), json!("ok-a")).unwrap();
        memory.submit_result(id, &agent("b"), json!("ok-b")).unwrap();

        let observer = {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move { memory.wait_for_all(id, Some(Duration::from_secs(2))).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        memory.submit_error(id, &agent("c"), "boom").unwrap();

        let outcome = observer.await.unwrap().unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[&agent("c")], "boom");
    }

    #[tokio::test]
    async fn late_observer_sees_the_same_outcome() {
        let memory = manager();
        let id = memory.create_collector(1).unwrap();
        memory.submit_result(id, &agent("a"), json!(42)).unwrap();

        let outcome = memory.wait_for_all(id, None).await.unwrap();
        assert_eq!(outcome.results[&agent("a")], json!(42));
    }

    #[tokio::test]
    async fn wait_for_all_times_out_on_incomplete_collector() {
        let memory = manager();
        let id = memory.create_collector(2).unwrap();
        memory.submit_result(id, &agent("a"), json!(1)).unwrap();

        let err = memory
            .wait_for_all(id, Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn completed_collectors_are_garbage_collected() {
        let memory = manager();
        let done = memory.create_collector(1).unwrap();
        let open = memory.create_collector(2).unwrap();
        memory.submit_result(done, &agent("a"), json!(1)).unwrap();

        assert_eq!(memory.gc_completed_collectors(), 1);
        assert_eq!(memory.collector_count(), 1);
        assert!(memory.wait_for_all(done, None).await.is_err());
        memory.remove_collector(open).unwrap();
    }
}
