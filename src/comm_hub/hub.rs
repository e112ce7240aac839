//! The coordination hub: pub/sub channels, request/reply correlation,
//! broadcast, and the periodic expiry sweep
//!
//! The hub owns the channel table and the pending-reply table and composes
//! the lock, barrier, semaphore, and shared-memory managers plus the input
//! router. It never reaches into their internals; each delegate is reachable
//! through an accessor.
//!
//! Delivery is synchronous inside `send`: subscribers run before `send`
//! returns, outside every internal critical section, and a panicking
//! subscriber does not affect the others. Broadcast skips the sender.
//!
//! Request/reply pre-assigns the message id and registers the pending-reply
//! entry before calling `send`, so a subscriber that replies synchronously
//! during delivery is correlated correctly.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::barriers::BarrierManager;
use super::callbacks::invoke_user_callback;
use super::config::HubConfig;
use super::deadlock::DeadlockDetector;
use super::domain_types::{
    AgentId, Envelope, EnvelopeDraft, HubStats, MessageId, Recipient, TopicName,
};
use super::locks::LockManager;
use super::sandesha::SandeshaRouter;
use super::semaphores::SemaphoreManager;
use super::shared_memory::SharedMemoryManager;
use super::traits::{
    GunaEvent, GunaHandler, HubError, HubResult, MessageHandler, PolicyHook, PrimitiveKind,
};
use crate::time_provider::{SharedTimeProvider, production_time_provider};

struct Channel {
    subscribers: HashMap<AgentId, (u64, MessageHandler)>,
    history: VecDeque<Envelope>,
}

struct PendingReply {
    topic: TopicName,
    reply_tx: oneshot::Sender<Envelope>,
}

/// Optional collaborators wired into the hub at construction
///
/// Absent capabilities are explicit `None`s, never untyped nulls.
#[derive(Debug, Default)]
pub struct HubOptions {
    /// Pre-send policy enforcement hook
    pub policy_hook: Option<Arc<dyn PolicyHook>>,
    /// Clock override, mainly for tests
    pub time_provider: Option<SharedTimeProvider>,
}

/// Unsubscribe handle returned by [`CommHub::subscribe`]
///
/// Unsubscribing also destroys the channel when it leaves no subscribers.
/// Dropping the handle keeps the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    channels: Weak<DashMap<TopicName, Channel>>,
    topic: TopicName,
    agent: AgentId,
    token: u64,
}

impl Subscription {
    /// Removes the handler registration
    pub fn unsubscribe(self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let now_empty = {
            let Some(mut channel) = channels.get_mut(&self.topic) else {
                return;
            };
            let still_ours = channel
                .subscribers
                .get(&self.agent)
                .is_some_and(|(token, _)| *token == self.token);
            if still_ours {
                channel.subscribers.remove(&self.agent);
            }
            channel.subscribers.is_empty()
        };
        if now_empty {
            channels.remove_if(&self.topic, |_, channel| channel.subscribers.is_empty());
        }
    }
}

/// Central in-process coordination hub for cooperating agents
///
/// Construct one per process (or per agent fleet) inside a Tokio runtime;
/// the background sweep task starts at construction when enabled. All state
/// is in-memory and lost on [`destroy`](CommHub::destroy).
pub struct CommHub {
    config: HubConfig,
    channels: Arc<DashMap<TopicName, Channel>>,
    pending_replies: DashMap<MessageId, PendingReply>,
    locks: Arc<LockManager>,
    barriers: Arc<BarrierManager>,
    semaphores: Arc<SemaphoreManager>,
    memory: Arc<SharedMemoryManager>,
    inputs: Arc<SandeshaRouter>,
    detector: DeadlockDetector,
    policy: Option<Arc<dyn PolicyHook>>,
    guna_handlers: DashMap<GunaEvent, Vec<GunaHandler>>,
    disposed: Arc<AtomicBool>,
    total_messages: AtomicU64,
    next_subscription: AtomicU64,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    time: SharedTimeProvider,
}

impl CommHub {
    /// Creates a hub with no optional collaborators
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_options(config, HubOptions::default())
    }

    /// Creates a hub with the given collaborators wired in
    #[must_use]
    pub fn with_options(config: HubConfig, options: HubOptions) -> Self {
        let time = options
            .time_provider
            .unwrap_or_else(production_time_provider);
        let default_timeout = config.default_timeout_ms.as_duration();

        let locks = Arc::new(LockManager::new(
            config.lock_ttl_ms.as_u64(),
            default_timeout,
            Arc::clone(&time),
        ));
        let memory = Arc::new(SharedMemoryManager::new(default_timeout, Arc::clone(&time)));
        let inputs = Arc::new(SandeshaRouter::new(
            config.max_pending_inputs.as_usize(),
            default_timeout,
            Arc::clone(&time),
        ));
        let detector = DeadlockDetector::new(Arc::clone(&locks), Arc::clone(&time));

        let hub = Self {
            channels: Arc::new(DashMap::new()),
            pending_replies: DashMap::new(),
            barriers: Arc::new(BarrierManager::new()),
            semaphores: Arc::new(SemaphoreManager::new(default_timeout)),
            locks,
            memory,
            inputs,
            detector,
            policy: options.policy_hook,
            guna_handlers: DashMap::new(),
            disposed: Arc::new(AtomicBool::new(false)),
            total_messages: AtomicU64::new(0),
            next_subscription: AtomicU64::new(1),
            sweep_task: Mutex::new(None),
            time,
            config,
        };

        if hub.config.enable_sweep {
            hub.start_sweep();
        }
        info!(
            sweep = hub.config.enable_sweep,
            max_channels = hub.config.max_channels.as_usize(),
            "hub created"
        );
        hub
    }

    /// Registers `handler` for `agent` on `topic`, creating the channel on
    /// first use
    ///
    /// Re-subscribing the same agent to the same topic replaces the previous
    /// handler. Fails `Full` when creating the channel would exceed the
    /// channel cap.
    pub fn subscribe(
        &self,
        agent: &AgentId,
        topic: &TopicName,
        handler: MessageHandler,
    ) -> HubResult<Subscription> {
        self.check_live()?;

        let token = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        match self.channels.entry(topic.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut()
                    .subscribers
                    .insert(agent.clone(), (token, handler));
            }
            Entry::Vacant(slot) => {
                if self.channels.len() >= self.config.max_channels.as_usize() {
                    return Err(HubError::Full {
                        subject: "channels".to_string(),
                        limit: self.config.max_channels.as_usize(),
                    });
                }
                let mut subscribers = HashMap::new();
                subscribers.insert(agent.clone(), (token, handler));
                slot.insert(Channel {
                    subscribers,
                    history: VecDeque::new(),
                });
            }
        }

        if self.config.enable_detailed_logs {
            debug!(%agent, %topic, "subscribed");
        }
        Ok(Subscription {
            channels: Arc::downgrade(&self.channels),
            topic: topic.clone(),
            agent: agent.clone(),
            token,
        })
    }

    /// Seals and delivers an envelope, assigning a fresh id
    ///
    /// See [`send_with_id`](CommHub::send_with_id) for the delivery contract.
    pub fn send(&self, draft: EnvelopeDraft) -> HubResult<Envelope> {
        self.send_with_id(draft, MessageId::generate())
    }

    /// Seals and delivers an envelope under a pre-assigned id
    ///
    /// When the draft's `reply_to` matches a pending request, the request is
    /// resolved with the envelope and neither broadcast nor history happens.
    /// Otherwise the envelope is appended to the channel history (trimming
    /// the oldest past capacity) and handlers are invoked synchronously:
    /// every subscriber except the sender for a broadcast, the addressed
    /// agent's handler otherwise.
    pub fn send_with_id(&self, draft: EnvelopeDraft, id: MessageId) -> HubResult<Envelope> {
        self.check_live()?;

        if let Some(policy) = &self.policy {
            let decision = policy.check(draft.topic.as_ref(), &draft.payload);
            if !decision.allowed {
                return Ok(self.deliver_policy_denial(&draft, decision.reason));
            }
        }

        let envelope = Envelope {
            id,
            timestamp: self.time.epoch_millis(),
            from: draft.from,
            to: draft.to,
            topic: draft.topic,
            payload: draft.payload,
            priority: draft.priority,
            ttl: draft.ttl,
            reply_to: draft.reply_to,
        };

        // Reply correlation short-circuits delivery and history.
        if let Some(original) = envelope.reply_to {
            if let Some((_, pending)) = self.pending_replies.remove(&original) {
                trace!(reply_to = %original, "reply correlated to pending request");
                let _ = pending.reply_tx.send(envelope.clone());
                self.total_messages.fetch_add(1, Ordering::Relaxed);
                return Ok(envelope);
            }
        }

        let handlers = self.record_and_collect(&envelope)?;
        for (subscriber, handler) in handlers {
            if self.config.enable_detailed_logs {
                trace!(%subscriber, topic = %envelope.topic, id = %envelope.id, "delivering");
            }
            invoke_user_callback("subscriber handler", || handler(&envelope));
        }

        self.total_messages.fetch_add(1, Ordering::Relaxed);
        Ok(envelope)
    }

    /// Sends `payload` to `to` on `topic` and waits for the correlated reply
    ///
    /// The pending-reply entry is registered before the send so a subscriber
    /// replying synchronously during delivery is not lost. The timeout path
    /// removes the entry before failing.
    pub async fn request(
        &self,
        to: &AgentId,
        topic: &TopicName,
        payload: Value,
        from: &AgentId,
        timeout: Option<Duration>,
    ) -> HubResult<Envelope> {
        self.check_live()?;

        let wait = timeout.unwrap_or(self.config.default_timeout_ms.as_duration());
        let id = MessageId::generate();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.pending_replies.insert(
            id,
            PendingReply {
                topic: topic.clone(),
                reply_tx,
            },
        );

        let draft = EnvelopeDraft::new(
            from.clone(),
            Recipient::Agent(to.clone()),
            topic.clone(),
            payload,
        );
        if let Err(err) = self.send_with_id(draft, id) {
            self.pending_replies.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(wait, &mut reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(HubError::Cancelled {
                resource: format!("request:{topic}"),
            }),
            Err(_) => {
                let removed = self.pending_replies.remove(&id).is_some();
                if !removed {
                    // The reply raced the timeout.
                    if let Ok(reply) = reply_rx.try_recv() {
                        return Ok(reply);
                    }
                }
                Err(HubError::Timeout {
                    resource: format!("request:{topic}"),
                    waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Replies to an earlier request envelope
    ///
    /// The reply is sent broadcast-addressed; correlation happens through
    /// the pending-reply check in `send`.
    pub fn reply(&self, original: MessageId, from: &AgentId, payload: Value) -> HubResult<Envelope> {
        self.check_live()?;
        let topic = self
            .pending_replies
            .get(&original)
            .map(|pending| pending.topic.clone())
            .ok_or_else(|| HubError::Unknown {
                kind: PrimitiveKind::PendingReply,
                name: original.to_string(),
            })?;
        let draft = EnvelopeDraft::new(from.clone(), Recipient::All, topic, payload)
            .with_reply_to(original);
        self.send(draft)
    }

    /// Broadcasts `payload` on `topic` to every subscriber except `from`
    pub fn broadcast(&self, from: &AgentId, topic: &TopicName, payload: Value) -> HubResult<Envelope> {
        let draft = EnvelopeDraft::new(from.clone(), Recipient::All, topic.clone(), payload);
        self.send(draft)
    }

    /// Returns the envelopes visible to `agent`, newest-priority first
    ///
    /// Includes envelopes addressed to the agent or broadcast, drops expired
    /// ones, applies the optional topic and strictly-after time filters, and
    /// sorts by `(priority, timestamp)` with `high < normal < low`.
    pub fn get_messages(
        &self,
        agent: &AgentId,
        topic: Option<&TopicName>,
        since_ms: Option<u64>,
    ) -> HubResult<Vec<Envelope>> {
        self.check_live()?;
        let now = self.time.epoch_millis();

        let mut messages: Vec<Envelope> = Vec::new();
        for channel in self.channels.iter() {
            if topic.is_some_and(|wanted| wanted != channel.key()) {
                continue;
            }
            messages.extend(
                channel
                    .value()
                    .history
                    .iter()
                    .filter(|envelope| envelope.to.includes(agent))
                    .filter(|envelope| !envelope.is_expired(now))
                    .filter(|envelope| since_ms.is_none_or(|since| envelope.timestamp > since))
                    .cloned(),
            );
        }

        messages.sort_by_key(|envelope| (envelope.priority.rank(), envelope.timestamp));
        Ok(messages)
    }

    /// Point-in-time counters across the hub and its delegates
    pub fn get_stats(&self) -> HubResult<HubStats> {
        self.check_live()?;
        let (active_locks, waiting_acquirers) = self.locks.stats();
        Ok(HubStats {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            active_channels: self.channels.len(),
            total_subscriptions: self
                .channels
                .iter()
                .map(|channel| channel.value().subscribers.len())
                .sum(),
            pending_replies: self.pending_replies.len(),
            active_locks,
            waiting_acquirers,
            active_barriers: self.barriers.count(),
            active_semaphores: self.semaphores.count(),
            active_regions: self.memory.region_count(),
            active_collectors: self.memory.collector_count(),
            pending_input_requests: self.inputs.pending_count(),
        })
    }

    /// Registers a handler for a guna health-actuation event
    pub fn on_guna_event(&self, event: GunaEvent, handler: GunaHandler) -> HubResult<()> {
        self.check_live()?;
        self.guna_handlers.entry(event).or_default().push(handler);
        Ok(())
    }

    /// Dispatches a guna event to every registered handler
    ///
    /// Handlers are failure-tolerant: a panicking handler does not abort the
    /// others.
    pub fn dispatch_guna_event(&self, event: GunaEvent, payload: &Value) -> HubResult<()> {
        self.check_live()?;
        let handlers: Vec<GunaHandler> = self
            .guna_handlers
            .get(&event)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        debug!(?event, handlers = handlers.len(), "dispatching guna event");
        for handler in handlers {
            invoke_user_callback("guna handler", || handler(payload));
        }
        Ok(())
    }

    /// The lock manager delegate
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The barrier manager delegate
    #[must_use]
    pub fn barriers(&self) -> &BarrierManager {
        &self.barriers
    }

    /// The semaphore manager delegate
    #[must_use]
    pub fn semaphores(&self) -> &SemaphoreManager {
        &self.semaphores
    }

    /// The shared-memory manager delegate
    #[must_use]
    pub fn memory(&self) -> &SharedMemoryManager {
        &self.memory
    }

    /// The input-request router delegate
    #[must_use]
    pub fn inputs(&self) -> &SandeshaRouter {
        &self.inputs
    }

    /// The deadlock detector over this hub's lock manager
    #[must_use]
    pub fn deadlock_detector(&self) -> &DeadlockDetector {
        &self.detector
    }

    /// Runs one expiry pass: expired envelopes, locks, regions, and
    /// completed collectors
    ///
    /// Called periodically by the background sweep; callable on demand.
    pub fn sweep_once(&self) {
        let now = self.time.epoch_millis();
        for mut channel in self.channels.iter_mut() {
            channel
                .value_mut()
                .history
                .retain(|envelope| !envelope.is_expired(now));
        }
        let released = self.locks.cleanup_expired();
        let evicted = self.memory.cleanup_regions();
        let collected = self.memory.gc_completed_collectors();
        if !released.is_empty() || !evicted.is_empty() || collected > 0 {
            debug!(
                locks = released.len(),
                regions = evicted.len(),
                collectors = collected,
                "sweep evicted expired state"
            );
        }
    }

    /// Tears the hub down
    ///
    /// Idempotent: the first call cancels the sweep, rejects every pending
    /// reply and waiter, and clears all state; later calls are no-ops. Every
    /// public operation fails `Disposed` afterwards.
    pub fn destroy(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("hub destroy");

        if let Ok(mut guard) = self.sweep_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }

        // Dropping the reply senders cancels every suspended requester.
        self.pending_replies.clear();
        self.locks.dispose();
        self.barriers.dispose();
        self.semaphores.dispose();
        self.memory.dispose();
        self.inputs.destroy();
        self.channels.clear();
        self.guna_handlers.clear();
    }

    /// True once `destroy` has run
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> HubResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(HubError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Appends to history and snapshots the handlers to invoke, inside one
    /// channel critical section
    fn record_and_collect(
        &self,
        envelope: &Envelope,
    ) -> HubResult<Vec<(AgentId, MessageHandler)>> {
        let capacity = self.config.max_history.as_usize();
        let mut slot = match self.channels.entry(envelope.topic.clone()) {
            Entry::Occupied(slot) => slot.into_ref(),
            Entry::Vacant(slot) => {
                if self.channels.len() >= self.config.max_channels.as_usize() {
                    return Err(HubError::Full {
                        subject: "channels".to_string(),
                        limit: self.config.max_channels.as_usize(),
                    });
                }
                slot.insert(Channel {
                    subscribers: HashMap::new(),
                    history: VecDeque::new(),
                })
            }
        };

        let channel = slot.value_mut();
        while channel.history.len() >= capacity {
            channel.history.pop_front();
        }
        channel.history.push_back(envelope.clone());

        let handlers = match &envelope.to {
            Recipient::All => channel
                .subscribers
                .iter()
                .filter(|(subscriber, _)| **subscriber != envelope.from)
                .map(|(subscriber, (_, handler))| (subscriber.clone(), Arc::clone(handler)))
                .collect(),
            Recipient::Agent(target) => channel
                .subscribers
                .get(target)
                .map(|(_, handler)| vec![(target.clone(), Arc::clone(handler))])
                .unwrap_or_default(),
        };
        Ok(handlers)
    }

    /// Builds and delivers a policy-denial error envelope to the caller only
    fn deliver_policy_denial(&self, draft: &EnvelopeDraft, reason: Option<String>) -> Envelope {
        let reason = reason.unwrap_or_else(|| "denied by policy".to_string());
        warn!(topic = %draft.topic, from = %draft.from, %reason, "send denied by policy");

        let envelope = Envelope {
            id: MessageId::generate(),
            timestamp: self.time.epoch_millis(),
            from: draft.from.clone(),
            to: Recipient::Agent(draft.from.clone()),
            topic: draft.topic.clone(),
            payload: json!({ "error": "policy_denied", "reason": reason }),
            priority: draft.priority,
            ttl: None,
            reply_to: None,
        };

        let handler = self.channels.get(&envelope.topic).and_then(|channel| {
            channel
                .subscribers
                .get(&draft.from)
                .map(|(_, handler)| Arc::clone(handler))
        });
        if let Some(handler) = handler {
            invoke_user_callback("subscriber handler", || handler(&envelope));
        }
        envelope
    }

    fn start_sweep(&self) {
        let channels = Arc::downgrade(&self.channels);
        let locks = Arc::clone(&self.locks);
        let memory = Arc::clone(&self.memory);
        let disposed = Arc::clone(&self.disposed);
        let time = Arc::clone(&self.time);
        let interval = self.config.sweep_interval_ms.as_duration();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if disposed.load(Ordering::SeqCst) {
                    break;
                }
                let Some(channels) = channels.upgrade() else {
                    break;
                };
                let now_ms = time.epoch_millis();
                for mut channel in channels.iter_mut() {
                    channel
                        .value_mut()
                        .history
                        .retain(|envelope| !envelope.is_expired(now_ms));
                }
                locks.cleanup_expired();
                memory.cleanup_regions();
                memory.gc_completed_collectors();
            }
        });
        if let Ok(mut guard) = self.sweep_task.lock() {
            *guard = Some(task);
        }
    }
}

impl Drop for CommHub {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweep_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for CommHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommHub")
            .field("channels", &self.channels.len())
            .field("pending_replies", &self.pending_replies.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
