//! Correlation of outbound input requests to inbound responses
//!
//! Sub-agents that need human or parent input park a request here and
//! suspend; the response side resolves it by request id. The pending set is
//! bounded, each request carries its own timeout, and every entry is
//! resolved exactly once: by response, timeout, cancellation, or destroy.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::domain_types::{InputRequest, InputResponse, RequestId};
use super::traits::{HubError, HubResult, PrimitiveKind};
use crate::time_provider::SharedTimeProvider;

struct PendingInput {
    response_tx: oneshot::Sender<InputResponse>,
}

/// Router for pending input requests
pub struct SandeshaRouter {
    pending: DashMap<RequestId, PendingInput>,
    max_pending: usize,
    default_timeout: Duration,
    disposed: AtomicBool,
    time: SharedTimeProvider,
}

impl SandeshaRouter {
    /// Creates a router bounding the pending set at `max_pending`
    #[must_use]
    pub fn new(max_pending: usize, default_timeout: Duration, time: SharedTimeProvider) -> Self {
        Self {
            pending: DashMap::new(),
            max_pending,
            default_timeout,
            disposed: AtomicBool::new(false),
            time,
        }
    }

    /// Parks `request` and suspends until the correlated response arrives
    ///
    /// Rejects with `Full` when the pending set is at its bound and with
    /// `Duplicate` when the request id is already pending. The per-request
    /// timeout (or the default) bounds the wait; the timeout path removes
    /// the entry before failing.
    pub async fn ask(&self, mut request: InputRequest) -> HubResult<InputResponse> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }

        request.created_at = self.time.epoch_millis();
        let request_id = request.request_id;
        let wait = request
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);

        if self.pending.len() >= self.max_pending {
            return Err(HubError::Full {
                subject: "pending input requests".to_string(),
                limit: self.max_pending,
            });
        }

        let mut response_rx;
        match self.pending.entry(request_id) {
            Entry::Occupied(_) => {
                return Err(HubError::Duplicate {
                    kind: PrimitiveKind::InputRequest,
                    name: request_id.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingInput { response_tx: tx });
                response_rx = rx;
                debug!(%request_id, agent = %request.agent_id, "input request pending");
            }
        }

        match tokio::time::timeout(wait, &mut response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HubError::Cancelled {
                resource: format!("input:{request_id}"),
            }),
            Err(_) => {
                let removed = self.pending.remove(&request_id).is_some();
                if !removed {
                    // A response raced the timeout; it is ours to keep.
                    if let Ok(response) = response_rx.try_recv() {
                        return Ok(response);
                    }
                }
                Err(HubError::Timeout {
                    resource: format!("input:{request_id}"),
                    waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Resolves a pending request with `value`
    pub fn respond(&self, request_id: RequestId, value: Value) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HubError::Disposed);
        }
        let (_, entry) = self
            .pending
            .remove(&request_id)
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::InputRequest,
                name: request_id.to_string(),
            })?;
        let response = InputResponse {
            request_id,
            value,
            responded_at: self.time.epoch_millis(),
        };
        if entry.response_tx.send(response).is_err() {
            trace!(%request_id, "asker gave up before the response landed");
        }
        Ok(())
    }

    /// Cancels a pending request; its asker completes with `Cancelled`
    pub fn cancel(&self, request_id: RequestId) -> HubResult<()> {
        self.pending
            .remove(&request_id)
            .map(|_| ())
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::InputRequest,
                name: request_id.to_string(),
            })
    }

    /// Requests currently awaiting a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Rejects every pending asker and refuses further requests
    pub fn destroy(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.pending.clear();
    }
}

impl std::fmt::Debug for SandeshaRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandeshaRouter")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;
    use crate::time_provider::production_time_provider;
    use serde_json::json;
    use std::sync::Arc;

    fn router(max_pending: usize) -> SandeshaRouter {
        SandeshaRouter::new(max_pending, Duration::from_secs(5), production_time_provider())
    }

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    #[tokio::test]
    async fn response_resolves_the_matching_request() {
        let router = Arc::new(router(10));
        let request = InputRequest::new(agent("sub"), "pick a branch");
        let request_id = request.request_id;

        let asker = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.ask(request).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(router.pending_count(), 1);

        router.respond(request_id, json!("main")).unwrap();
        let response = asker.await.unwrap().unwrap();
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.value, json!("main"));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn per_request_timeout_removes_the_entry() {
        let router = router(10);
        let request = InputRequest::new(agent("sub"), "anyone there?").with_timeout_ms(30);
        let err = router.ask(request).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn overflow_rejects_the_new_request() {
        let router = Arc::new(router(1));
        let first = InputRequest::new(agent("sub"), "slow one");

        let asker = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.ask(first).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = InputRequest::new(agent("sub"), "one too many");
        let err = router.ask(second).await.unwrap_err();
        assert!(matches!(err, HubError::Full { limit: 1, .. }));

        router.destroy();
        assert!(asker.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn respond_to_unknown_request_fails() {
        let router = router(10);
        let err = router.respond(RequestId::generate(), json!(1)).unwrap_err();
        assert!(matches!(err, HubError::Unknown { .. }));
    }

    #[tokio::test]
    async fn destroy_rejects_all_pending_askers() {
        let router = Arc::new(router(10));
        let request = InputRequest::new(agent("sub"), "waiting");

        let asker = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.ask(request).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        router.destroy();
        let err = asker.await.unwrap().unwrap_err();
        assert!(matches!(err, HubError::Cancelled { .. }));

        let err = router.ask(InputRequest::new(agent("sub"), "late")).await.unwrap_err();
        assert!(err.is_disposed());
    }
}
