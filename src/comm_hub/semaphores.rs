//! Counting semaphores with fair FIFO permit queues
//!
//! Fairness is strict: a fresh acquirer arriving while the queue is
//! non-empty is enqueued even if a permit is momentarily available, and a
//! released permit is handed directly to the head waiter without touching
//! the counter. The counter only moves when no one is waiting.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::domain_types::{AgentId, SemaphoreName, SemaphoreStatus};
use super::traits::{HubError, HubResult, PrimitiveKind};

struct SemWaiter {
    agent: AgentId,
    waiter_id: u64,
    grant_tx: oneshot::Sender<()>,
}

struct SemaphoreEntry {
    max_permits: usize,
    current_permits: usize,
    wait_queue: VecDeque<SemWaiter>,
}

/// Manager for named counting semaphores
pub struct SemaphoreManager {
    semaphores: DashMap<SemaphoreName, SemaphoreEntry>,
    default_timeout: Duration,
    next_waiter_id: AtomicU64,
    disposed: AtomicBool,
}

impl SemaphoreManager {
    /// Creates a semaphore manager
    ///
    /// `default_timeout` applies to acquires that pass no timeout of their
    /// own.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            semaphores: DashMap::new(),
            default_timeout,
            next_waiter_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    /// Creates a semaphore with `permits` initial (and maximum) permits
    pub fn create(&self, name: &SemaphoreName, permits: usize) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        if permits == 0 {
            return Err(HubError::Protocol {
                message: format!("semaphore '{name}' requires at least one permit"),
            });
        }
        match self.semaphores.entry(name.clone()) {
            Entry::Occupied(_) => Err(HubError::Duplicate {
                kind: PrimitiveKind::Semaphore,
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(SemaphoreEntry {
                    max_permits: permits,
                    current_permits: permits,
                    wait_queue: VecDeque::new(),
                });
                debug!(%name, permits, "semaphore created");
                Ok(())
            }
        }
    }

    /// Acquires a permit, suspending FIFO when none is available
    pub async fn acquire(
        &self,
        name: &SemaphoreName,
        agent: &AgentId,
        timeout: Option<Duration>,
    ) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let wait = timeout.unwrap_or(self.default_timeout);
        let waiter_id;
        let mut grant_rx;

        {
            let mut entry = self
                .semaphores
                .get_mut(name)
                .ok_or_else(|| HubError::Unknown {
                    kind: PrimitiveKind::Semaphore,
                    name: name.to_string(),
                })?;

            if entry.wait_queue.is_empty() && entry.current_permits > 0 {
                entry.current_permits -= 1;
                trace!(%name, %agent, remaining = entry.current_permits, "permit granted");
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            entry.wait_queue.push_back(SemWaiter {
                agent: agent.clone(),
                waiter_id,
                grant_tx: tx,
            });
            grant_rx = rx;
            trace!(%name, %agent, queue_depth = entry.wait_queue.len(), "queued for permit");
        }

        match tokio::time::timeout(wait, &mut grant_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HubError::Cancelled {
                resource: format!("semaphore:{name}"),
            }),
            Err(_) => {
                if let Some(mut entry) = self.semaphores.get_mut(name) {
                    entry.wait_queue.retain(|w| w.waiter_id != waiter_id);
                }
                // A grant sent before the queue removal means the permit is
                // already ours.
                match grant_rx.try_recv() {
                    Ok(()) => Ok(()),
                    Err(_) => Err(HubError::Timeout {
                        resource: format!("semaphore:{name}"),
                        waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            }
        }
    }

    /// Releases a permit
    ///
    /// Hands it to the head waiter when the queue is non-empty (the counter
    /// does not move); otherwise increments, capped at the maximum.
    pub fn release(&self, name: &SemaphoreName, agent: &AgentId) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let mut entry = self
            .semaphores
            .get_mut(name)
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Semaphore,
                name: name.to_string(),
            })?;

        while let Some(waiter) = entry.wait_queue.pop_front() {
            let next = waiter.agent.clone();
            if waiter.grant_tx.send(()).is_ok() {
                trace!(%name, from = %agent, to = %next, "permit handed to waiter");
                return Ok(());
            }
            // Waiter gave up between enqueue and grant; try the next one.
        }

        entry.current_permits = (entry.current_permits + 1).min(entry.max_permits);
        trace!(%name, from = %agent, available = entry.current_permits, "permit returned");
        Ok(())
    }

    /// Permits currently available
    pub fn available_permits(&self, name: &SemaphoreName) -> HubResult<usize> {
        self.semaphores
            .get(name)
            .map(|entry| entry.current_permits)
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Semaphore,
                name: name.to_string(),
            })
    }

    /// Snapshot of a semaphore's state
    pub fn status(&self, name: &SemaphoreName) -> HubResult<SemaphoreStatus> {
        let entry = self.semaphores.get(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Semaphore,
            name: name.to_string(),
        })?;
        Ok(SemaphoreStatus {
            name: name.clone(),
            max_permits: entry.max_permits,
            available: entry.current_permits,
            waiting: entry.wait_queue.len(),
        })
    }

    /// Number of semaphores that exist
    #[must_use]
    pub fn count(&self) -> usize {
        self.semaphores.len()
    }

    /// Cancels every queued acquirer and clears all semaphores
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.semaphores.clear();
    }
}

impl std::fmt::Debug for SemaphoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreManager")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
