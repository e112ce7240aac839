//! Named re-entrant locks with FIFO wait queues, timeouts, and forced release
//!
//! Each resource key has at most one lock entry. The holder is recorded on
//! the entry; contending agents queue in strict FIFO order and suspend on a
//! private completion channel. Grant-on-release: the head of the wait queue
//! is the next holder, and the new lock inherits the remaining queue.
//!
//! A waiter that times out removes itself from the queue under the entry's
//! critical section. Because grants are also sent under that section, the
//! timed-out-but-already-granted race resolves deterministically: if the
//! grant won, the waiter keeps the lock.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::domain_types::{AgentId, LockInfo, ResourceName};
use super::traits::{HubError, HubResult, PrimitiveKind};
use crate::time_provider::SharedTimeProvider;

struct LockWaiter {
    agent: AgentId,
    waiter_id: u64,
    grant_tx: oneshot::Sender<LockInfo>,
}

struct LockEntry {
    holder: AgentId,
    acquired_at: u64,
    expires_at: u64,
    wait_queue: VecDeque<LockWaiter>,
}

impl LockEntry {
    fn info(&self, resource: &ResourceName) -> LockInfo {
        LockInfo {
            resource: resource.clone(),
            holder: self.holder.clone(),
            acquired_at: self.acquired_at,
            expires_at: self.expires_at,
            waiters: self.wait_queue.iter().map(|w| w.agent.clone()).collect(),
        }
    }
}

/// Manager for named re-entrant locks
///
/// Self-contained: all mutable state is reachable only through these
/// methods. The deadlock detector consumes read-only [`snapshot`]s.
///
/// [`snapshot`]: LockManager::snapshot
pub struct LockManager {
    locks: DashMap<ResourceName, LockEntry>,
    lock_ttl_ms: u64,
    default_timeout: Duration,
    next_waiter_id: AtomicU64,
    disposed: AtomicBool,
    time: SharedTimeProvider,
}

impl LockManager {
    /// Creates a lock manager
    ///
    /// `lock_ttl_ms` bounds how long a grant survives before the sweep may
    /// force-release it; `default_timeout` applies to acquires that pass no
    /// timeout of their own.
    #[must_use]
    pub fn new(lock_ttl_ms: u64, default_timeout: Duration, time: SharedTimeProvider) -> Self {
        Self {
            locks: DashMap::new(),
            lock_ttl_ms,
            default_timeout,
            next_waiter_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            time,
        }
    }

    /// Acquires the lock for `resource` on behalf of `agent`
    ///
    /// Grants immediately when the resource is free, returns the existing
    /// lock when `agent` already holds it (re-entrancy), and otherwise
    /// queues FIFO and suspends until granted or timed out.
    pub async fn acquire(
        &self,
        resource: &ResourceName,
        agent: &AgentId,
        timeout: Option<Duration>,
    ) -> HubResult<LockInfo> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let wait = timeout.unwrap_or(self.default_timeout);
        let waiter_id;
        let mut grant_rx;

        match self.locks.entry(resource.clone()) {
            Entry::Vacant(slot) => {
                let now = self.time.epoch_millis();
                let entry = LockEntry {
                    holder: agent.clone(),
                    acquired_at: now,
                    expires_at: now.saturating_add(self.lock_ttl_ms),
                    wait_queue: VecDeque::new(),
                };
                let info = entry.info(resource);
                slot.insert(entry);
                trace!(%resource, %agent, "lock granted immediately");
                return Ok(info);
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.holder == *agent {
                    trace!(%resource, %agent, "re-entrant acquire returns held lock");
                    return Ok(entry.info(resource));
                }

                let (tx, rx) = oneshot::channel();
                waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                entry.wait_queue.push_back(LockWaiter {
                    agent: agent.clone(),
                    waiter_id,
                    grant_tx: tx,
                });
                grant_rx = rx;
                trace!(%resource, %agent, queue_depth = entry.wait_queue.len(), "queued for lock");
            }
        }

        match tokio::time::timeout(wait, &mut grant_rx).await {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(_)) => Err(HubError::Cancelled {
                resource: resource.to_string(),
            }),
            Err(_) => {
                // Leave the queue under the entry's critical section; a grant
                // sent before we got here stays ours.
                if let Some(mut entry) = self.locks.get_mut(resource) {
                    entry.wait_queue.retain(|w| w.waiter_id != waiter_id);
                }
                match grant_rx.try_recv() {
                    Ok(info) => {
                        debug!(%resource, %agent, "grant raced the timeout; keeping lock");
                        Ok(info)
                    }
                    Err(_) => Err(HubError::Timeout {
                        resource: format!("lock:{resource}"),
                        waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            }
        }
    }

    /// Releases the lock held by `agent`
    ///
    /// Fails with `Unknown` when no lock exists for the resource and with
    /// `Denied` when the caller is not the holder. Grants to the head waiter
    /// when one exists, otherwise destroys the entry.
    pub fn release(&self, resource: &ResourceName, agent: &AgentId) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        match self.locks.entry(resource.clone()) {
            Entry::Vacant(_) => Err(HubError::Unknown {
                kind: PrimitiveKind::Lock,
                name: resource.to_string(),
            }),
            Entry::Occupied(slot) => {
                if slot.get().holder != *agent {
                    return Err(HubError::Denied {
                        agent: agent.clone(),
                        action: "release".to_string(),
                        resource: format!("lock:{resource}"),
                    });
                }
                self.hand_off(resource, slot);
                Ok(())
            }
        }
    }

    /// True when a lock entry exists for the resource
    #[must_use]
    pub fn is_locked(&self, resource: &ResourceName) -> bool {
        self.locks.contains_key(resource)
    }

    /// Releases the lock regardless of holder
    ///
    /// Grants to the next waiter if any. Used by deadlock resolution and the
    /// expiry sweep; ordinary callers should use [`release`].
    ///
    /// [`release`]: LockManager::release
    pub fn force_release(&self, resource: &ResourceName) -> HubResult<AgentId> {
        match self.locks.entry(resource.clone()) {
            Entry::Vacant(_) => Err(HubError::Unknown {
                kind: PrimitiveKind::Lock,
                name: resource.to_string(),
            }),
            Entry::Occupied(slot) => {
                let previous = slot.get().holder.clone();
                warn!(%resource, holder = %previous, "forcing lock release");
                self.hand_off(resource, slot);
                Ok(previous)
            }
        }
    }

    /// Releases every lock whose expiry has passed
    ///
    /// Returns the resources that were force-released.
    pub fn cleanup_expired(&self) -> Vec<ResourceName> {
        let now = self.time.epoch_millis();
        let expired: Vec<ResourceName> = self
            .locks
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = Vec::new();
        for resource in expired {
            if let Entry::Occupied(slot) = self.locks.entry(resource.clone()) {
                // Re-check under the entry lock; a release may have raced us.
                if slot.get().expires_at <= now {
                    debug!(%resource, holder = %slot.get().holder, "releasing expired lock");
                    self.hand_off(&resource, slot);
                    released.push(resource);
                }
            }
        }
        released
    }

    /// Read-only view of the full lock table
    ///
    /// The deadlock detector builds its wait-for graph from this.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LockInfo> {
        self.locks
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect()
    }

    /// Counts of held locks and queued waiters
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        let active = self.locks.len();
        let waiting = self
            .locks
            .iter()
            .map(|entry| entry.value().wait_queue.len())
            .sum();
        (active, waiting)
    }

    /// Rejects every pending waiter and clears the table
    ///
    /// All subsequent operations fail with `Disposed`; suspended acquirers
    /// complete with `Cancelled`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        // Dropping the entries drops every queued grant sender, which wakes
        // the corresponding waiters with a cancellation.
        self.locks.clear();
    }

    /// Grants to the next live waiter or removes the entry
    fn hand_off(
        &self,
        resource: &ResourceName,
        mut slot: dashmap::mapref::entry::OccupiedEntry<'_, ResourceName, LockEntry>,
    ) {
        let now = self.time.epoch_millis();
        loop {
            let entry = slot.get_mut();
            match entry.wait_queue.pop_front() {
                Some(waiter) => {
                    entry.holder = waiter.agent.clone();
                    entry.acquired_at = now;
                    entry.expires_at = now.saturating_add(self.lock_ttl_ms);
                    let info = entry.info(resource);
                    let next = waiter.agent;
                    if waiter.grant_tx.send(info).is_ok() {
                        trace!(%resource, holder = %next, "lock handed to next waiter");
                        return;
                    }
                    // Waiter gave up between enqueue and grant; try the next one.
                }
                None => {
                    slot.remove();
                    trace!(%resource, "lock destroyed, no waiters");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (active, waiting) = self.stats();
        f.debug_struct("LockManager")
            .field("active", &active)
            .field("waiting", &waiting)
            .finish_non_exhaustive()
    }
}
