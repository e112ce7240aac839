//! Named rendezvous barriers: N distinct arrivals release everyone
//!
//! Arrivals are set-semantic, so a repeat arrival by the same agent cannot
//! double-count. Once the required count is reached the barrier stays
//! released: every currently-suspended arrival completes and every future
//! arrival returns immediately.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::domain_types::{AgentId, BarrierName, BarrierStatus};
use super::traits::{HubError, HubResult, PrimitiveKind};

struct BarrierEntry {
    required: usize,
    arrived: HashSet<AgentId>,
    released: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Manager for named rendezvous barriers
pub struct BarrierManager {
    barriers: DashMap<BarrierName, BarrierEntry>,
    disposed: AtomicBool,
}

impl BarrierManager {
    /// Creates an empty barrier manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            barriers: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Creates a barrier requiring `required` distinct arrivals
    pub fn create(&self, name: &BarrierName, required: usize) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        if required == 0 {
            return Err(HubError::Protocol {
                message: format!("barrier '{name}' requires at least one arrival"),
            });
        }
        match self.barriers.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HubError::Duplicate {
                kind: PrimitiveKind::Barrier,
                name: name.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(BarrierEntry {
                    required,
                    arrived: HashSet::new(),
                    released: false,
                    waiters: Vec::new(),
                });
                debug!(%name, required, "barrier created");
                Ok(())
            }
        }
    }

    /// Arrives at the barrier, suspending until it releases
    ///
    /// The releasing arrival's own call also completes; arrivals after
    /// release return immediately.
    pub async fn arrive(&self, name: &BarrierName, agent: &AgentId) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        let wait_rx = {
            let mut entry = self.barriers.get_mut(name).ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Barrier,
                name: name.to_string(),
            })?;

            if entry.released {
                trace!(%name, %agent, "arrival after release returns immediately");
                return Ok(());
            }

            entry.arrived.insert(agent.clone());
            if entry.arrived.len() >= entry.required {
                entry.released = true;
                let waiters = std::mem::take(&mut entry.waiters);
                drop(entry);
                debug!(%name, "barrier released");
                for waiter in waiters {
                    // A waiter cancelled mid-wait is fine to skip.
                    let _ = waiter.send(());
                }
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            trace!(%name, %agent, arrived = entry.arrived.len(), "suspended at barrier");
            rx
        };

        wait_rx.await.map_err(|_| HubError::Cancelled {
            resource: format!("barrier:{name}"),
        })
    }

    /// Snapshot of a barrier's progress
    pub fn status(&self, name: &BarrierName) -> HubResult<BarrierStatus> {
        let entry = self.barriers.get(name).ok_or_else(|| HubError::Unknown {
            kind: PrimitiveKind::Barrier,
            name: name.to_string(),
        })?;
        Ok(BarrierStatus {
            name: name.clone(),
            required: entry.required,
            arrived: entry.arrived.len(),
            released: entry.released,
        })
    }

    /// Removes a barrier, cancelling anyone still suspended at it
    pub fn remove(&self, name: &BarrierName) -> HubResult<()> {
        self.barriers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::Barrier,
                name: name.to_string(),
            })
    }

    /// Number of barriers that exist
    #[must_use]
    pub fn count(&self) -> usize {
        self.barriers.len()
    }

    /// Cancels every suspended arrival and clears all barriers
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.barriers.clear();
    }
}

impl Default for BarrierManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BarrierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrierManager")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
