//! Typed message routing over the peer transport
//!
//! `MessageBus` layers typed publish/subscribe and a request/reply
//! convenience over one bidirectional, intermittently-reachable channel to
//! exactly one paired device. Inbound frames are classified on a single
//! router task — the bus's delivery context — so per-subscriber delivery
//! order equals transport arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use swimsync_core::config::SwimsyncConfig;
use swimsync_core::message::{self, keys};
use swimsync_core::platform::{InboundFrame, LinkState, PeerLink};
use swimsync_core::{
    MessageKind, Payload, PeerMessage, RequestError, SystemTimeSource, TimeSource,
};

/// Identifier returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = Uuid;

// ----------------------------------------------------------------------------
// Internal Tables
// ----------------------------------------------------------------------------

/// One registered subscriber for a message kind
struct Subscription {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<PeerMessage>,
}

/// An outstanding request. The DashMap `remove` is the single-fire guard:
/// whichever resolution path (reply, delivery error, timeout) removes the
/// entry first delivers the completion; everyone else finds it gone.
struct PendingRequest {
    completion: oneshot::Sender<Option<Payload>>,
}

/// Optional handler producing a domain response for reply-required inbound
/// messages; its output is merged over the mandatory ack frame.
type Responder = dyn Fn(&PeerMessage) -> Option<PeerMessage> + Send + Sync;

struct BusInner {
    link: Arc<dyn PeerLink>,
    pending: DashMap<Uuid, PendingRequest>,
    subscriptions: Mutex<HashMap<MessageKind, Vec<Subscription>>>,
    responder: Mutex<Option<Box<Responder>>>,
    link_events: broadcast::Sender<LinkState>,
    default_timeout: Duration,
}

// ----------------------------------------------------------------------------
// Message Bus
// ----------------------------------------------------------------------------

/// Typed many-producer/many-consumer message router over the peer link.
///
/// Cheap to clone; clones share the subscription table and pending requests.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus over the given link
    pub fn new(link: Arc<dyn PeerLink>, config: &SwimsyncConfig) -> Self {
        let (link_events, _) = broadcast::channel(config.channels.notification_buffer_size);
        Self {
            inner: Arc::new(BusInner {
                link,
                pending: DashMap::new(),
                subscriptions: Mutex::new(HashMap::new()),
                responder: Mutex::new(None),
                link_events,
                default_timeout: config.request.default_timeout,
            }),
        }
    }

    /// Spawn the router task consuming inbound frames and link changes.
    ///
    /// This is the bus's delivery context: every inbound frame is classified
    /// and dispatched here, in arrival order.
    pub fn spawn_router(
        &self,
        mut inbound: mpsc::Receiver<InboundFrame>,
        mut link_rx: watch::Receiver<LinkState>,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            info!("message router starting");
            loop {
                tokio::select! {
                    frame = inbound.recv() => {
                        let Some(frame) = frame else { break };
                        bus.handle_inbound(frame);
                    }
                    changed = link_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *link_rx.borrow_and_update();
                        debug!(?state, "peer link state changed");
                        let _ = bus.inner.link_events.send(state);
                    }
                }
            }
            info!("message router stopped");
        })
    }

    /// Whether the peer can currently receive messages
    pub fn is_peer_reachable(&self) -> bool {
        self.inner.link.is_reachable()
    }

    /// Dedicated liveness stream: reachability/activation changes of the
    /// underlying link, so collaborators can react without polling.
    pub fn link_changes(&self) -> broadcast::Receiver<LinkState> {
        self.inner.link_events.subscribe()
    }

    /// Default request deadline from configuration
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Fire-and-forget send.
    ///
    /// Returns false immediately — without touching the transport — when the
    /// peer is unreachable. A true return only means the transport accepted
    /// the send. No retry, no queueing: the caller decides.
    pub async fn publish(&self, message: PeerMessage) -> bool {
        if !self.inner.link.is_reachable() {
            debug!(kind = ?message.kind(), "peer unreachable, publish short-circuited");
            return false;
        }
        match self.inner.link.send(message.into_payload()).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "transport rejected send");
                false
            }
        }
    }

    /// Request/reply with the configured default timeout
    pub async fn request_default(&self, message: PeerMessage) -> Option<Payload> {
        self.request(message, self.inner.default_timeout).await
    }

    /// Send a message and await its correlated reply.
    ///
    /// Exactly one of three events resolves the call: the reply frame, a
    /// transport delivery error, or the deadline — all three funnel through
    /// [`MessageBus::resolve`], whose map-removal makes a double completion
    /// structurally impossible even when the reply races the timer.
    pub async fn request(&self, message: PeerMessage, timeout: Duration) -> Option<Payload> {
        if !self.inner.link.is_reachable() {
            debug!(kind = ?message.kind(), "peer unreachable, request short-circuited");
            return None;
        }

        let correlation = Uuid::new_v4();
        let payload = message::with_correlation(message.into_payload(), correlation);
        let (completion, resolved) = oneshot::channel();
        self.inner
            .pending
            .insert(correlation, PendingRequest { completion });

        let bus = self.clone();
        tokio::spawn(async move {
            match bus.inner.link.send_with_reply(payload).await {
                Ok(reply) => {
                    bus.resolve(correlation, Some(reply));
                }
                Err(error) => {
                    warn!(%error, %correlation, "request delivery failed");
                    bus.resolve(correlation, None);
                }
            }
        });

        match tokio::time::timeout(timeout, resolved).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => None,
            Err(_) => {
                let error = RequestError::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                };
                debug!(%error, %correlation, "request resolved by deadline");
                self.resolve(correlation, None);
                None
            }
        }
    }

    /// Resolve a pending request. Returns true when this call delivered the
    /// completion; false when another path already did.
    fn resolve(&self, correlation: Uuid, outcome: Option<Payload>) -> bool {
        match self.inner.pending.remove(&correlation) {
            Some((_, pending)) => {
                let _ = pending.completion.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Number of requests currently awaiting resolution
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Register a subscriber for a message kind. Messages of that kind are
    /// delivered in arrival order; across subscriptions of the same kind,
    /// dispatch follows insertion order.
    pub fn subscribe(
        &self,
        kind: MessageKind,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<PeerMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock_subscriptions()
            .entry(kind)
            .or_default()
            .push(Subscription { id, sender });
        (id, receiver)
    }

    /// Remove a subscription by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut table = self.lock_subscriptions();
        for subscribers in table.values_mut() {
            subscribers.retain(|subscription| subscription.id != id);
        }
    }

    /// Register the handler that produces domain responses for the
    /// reply-required inbound path
    pub fn set_responder(
        &self,
        responder: impl Fn(&PeerMessage) -> Option<PeerMessage> + Send + Sync + 'static,
    ) {
        *lock_ignoring_poison(&self.inner.responder) = Some(Box::new(responder));
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<MessageKind, Vec<Subscription>>> {
        lock_ignoring_poison(&self.inner.subscriptions)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Classify and dispatch one inbound frame; answer its reply slot when
    /// present. Total: unclassifiable frames are logged and dropped, never
    /// an error — they correspond to no caller's outstanding request.
    fn handle_inbound(&self, frame: InboundFrame) {
        let InboundFrame { payload, reply } = frame;

        // A frame carrying a known correlation id resolves that pending
        // request; it is still dispatched to subscribers below.
        if let Some(correlation) = message::correlation_id(&payload) {
            if self.resolve(correlation, Some(payload.clone())) {
                debug!(%correlation, "inbound frame resolved pending request");
            }
        }

        let message = PeerMessage::classify(&payload);
        match &message {
            PeerMessage::Unclassified(_) => {
                debug!("dropping unclassifiable inbound message");
            }
            _ => self.dispatch(message.clone()),
        }

        if let Some(reply_to) = reply {
            // The peer's pending request must resolve rather than time out:
            // always exactly one reply frame, ack + receipt timestamp at
            // minimum, domain response merged over it when a handler has one.
            let mut frame = message::ack_frame(SystemTimeSource.now());
            let response = lock_ignoring_poison(&self.inner.responder)
                .as_ref()
                .and_then(|responder| responder(&message));
            if let Some(response) = response {
                for (key, value) in response.into_payload() {
                    frame.insert(key, value);
                }
            }
            if let Some(correlation) = message::correlation_id(&payload) {
                frame.insert(
                    keys::CORRELATION_ID.into(),
                    serde_json::json!(correlation.to_string()),
                );
            }
            if reply_to.send(frame).is_err() {
                debug!("reply receiver dropped before the reply was sent");
            }
        }
    }

    /// Deliver a classified message to every subscriber of its kind, in
    /// insertion order. Subscribers with dropped receivers are pruned.
    fn dispatch(&self, message: PeerMessage) {
        let kind = message.kind();
        let mut table = self.lock_subscriptions();
        if let Some(subscribers) = table.get_mut(&kind) {
            subscribers.retain(|subscription| subscription.sender.send(message.clone()).is_ok());
        }
    }
}

/// Mutex poisoning only occurs after a panic in a holder; recover the data
/// rather than propagating the poison.
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use swimsync_core::TransportError;

    /// Inline link double: reachability toggle plus send counting. The
    /// scriptable link lives in swimsync-harness.
    struct InlineLink {
        reachable: AtomicBool,
        sends: AtomicU64,
    }

    impl InlineLink {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                sends: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl PeerLink for InlineLink {
        fn is_supported(&self) -> bool {
            true
        }

        fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        async fn send(&self, _payload: Payload) -> Result<(), TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_with_reply(&self, _payload: Payload) -> Result<Payload, TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            // never replies; requests resolve via timeout
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_publish_unreachable_short_circuit() {
        let link = InlineLink::new(false);
        let bus = MessageBus::new(link.clone(), &SwimsyncConfig::testing());

        let accepted = bus.publish(PeerMessage::HeartRate { bpm: 100 }).await;
        assert!(!accepted);
        assert_eq!(link.sends.load(Ordering::SeqCst), 0, "transport untouched");
    }

    #[tokio::test]
    async fn test_publish_reachable_hits_transport() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link.clone(), &SwimsyncConfig::testing());

        assert!(bus.publish(PeerMessage::HeartRate { bpm: 100 }).await);
        assert_eq!(link.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_releases_pending_exactly_once() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());

        let reply = bus
            .request(PeerMessage::PoolLengthRequest, Duration::from_secs(3))
            .await;
        assert!(reply.is_none());
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());

        let (id, mut rx) = bus.subscribe(MessageKind::HeartRate);
        bus.dispatch(PeerMessage::HeartRate { bpm: 90 });
        assert!(rx.try_recv().is_ok());

        bus.unsubscribe(id);
        bus.dispatch(PeerMessage::HeartRate { bpm: 91 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_insertion_order() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());

        let (_a, mut rx_a) = bus.subscribe(MessageKind::StrokeCount);
        let (_b, mut rx_b) = bus.subscribe(MessageKind::StrokeCount);
        bus.dispatch(PeerMessage::StrokeCount { count: 7 });

        assert_eq!(rx_a.try_recv().ok(), Some(PeerMessage::StrokeCount { count: 7 }));
        assert_eq!(rx_b.try_recv().ok(), Some(PeerMessage::StrokeCount { count: 7 }));
    }

    #[tokio::test]
    async fn test_unclassified_inbound_is_dropped_silently() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());

        let (_id, mut rx) = bus.subscribe(MessageKind::HeartRate);
        let mut junk = Payload::new();
        junk.insert("garbage".into(), serde_json::json!(1));
        bus.handle_inbound(InboundFrame::notify(junk));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reply_required_inbound_always_acks() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());

        // no responder registered: ack frame alone
        let (frame, reply_rx) =
            InboundFrame::expecting_reply(PeerMessage::HeartRate { bpm: 80 }.into_payload());
        bus.handle_inbound(frame);
        let reply = reply_rx.await.expect("reply frame produced");
        assert_eq!(reply.get("ack"), Some(&serde_json::json!(true)));
        assert!(reply.contains_key("receivedAt"));
    }

    #[tokio::test]
    async fn test_responder_output_merged_over_ack() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());
        bus.set_responder(|message| match message {
            PeerMessage::PoolLengthRequest => Some(PeerMessage::PoolLength { meters: 50.0 }),
            _ => None,
        });

        let (frame, reply_rx) =
            InboundFrame::expecting_reply(PeerMessage::PoolLengthRequest.into_payload());
        bus.handle_inbound(frame);
        let reply = reply_rx.await.expect("reply frame produced");
        assert_eq!(reply.get("ack"), Some(&serde_json::json!(true)));
        assert_eq!(reply.get("poolSize"), Some(&serde_json::json!(50.0)));
    }

    #[tokio::test]
    async fn test_inbound_resolves_pending_and_still_dispatches() {
        let link = InlineLink::new(true);
        let bus = MessageBus::new(link, &SwimsyncConfig::testing());
        let (_id, mut rx) = bus.subscribe(MessageKind::PoolLength);

        let correlation = Uuid::new_v4();
        let (completion, resolved) = oneshot::channel();
        bus.inner
            .pending
            .insert(correlation, PendingRequest { completion });

        let payload = message::with_correlation(
            PeerMessage::PoolLength { meters: 25.0 }.into_payload(),
            correlation,
        );
        bus.handle_inbound(InboundFrame::notify(payload));

        // request/reply and pub/sub are not mutually exclusive
        assert!(resolved.await.expect("completion fired").is_some());
        assert_eq!(
            rx.try_recv().ok(),
            Some(PeerMessage::PoolLength { meters: 25.0 })
        );
        assert_eq!(bus.pending_requests(), 0);
    }
}
