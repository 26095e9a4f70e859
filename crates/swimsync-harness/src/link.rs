//! Scriptable peer link
//!
//! A [`PeerLink`] double with full control over reachability, reply
//! behavior, and delivery failures, plus helpers for injecting inbound
//! frames on both entry points. Optionally simulates latency jitter and
//! packet loss for soak-style tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use swimsync_core::platform::{InboundFrame, LinkState, PeerLink};
use swimsync_core::{Payload, TransportError};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Behavior knobs for the mock link
#[derive(Debug, Clone)]
pub struct MockLinkConfig {
    /// Initial reachability
    pub reachable: bool,
    /// Whether the transport reports itself as supported
    pub supported: bool,
    /// Fixed delay before a scripted reply is returned
    pub reply_delay: Duration,
    /// Probability that a send is dropped with a delivery error
    pub loss_rate: f64,
    /// Buffer size for the inbound frame channel
    pub inbound_buffer_size: usize,
}

impl Default for MockLinkConfig {
    fn default() -> Self {
        Self {
            reachable: true,
            supported: true,
            reply_delay: Duration::ZERO,
            loss_rate: 0.0,
            inbound_buffer_size: 64,
        }
    }
}

impl MockLinkConfig {
    /// A link that starts unreachable
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    /// A lossy link dropping roughly the given fraction of sends
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Link
// ----------------------------------------------------------------------------

type ReplyScript = dyn Fn(&Payload) -> Result<Payload, TransportError> + Send + Sync;

struct MockLinkInner {
    config: MockLinkConfig,
    supported: AtomicBool,
    reachable: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<Payload>>,
    reply: Mutex<Option<Box<ReplyScript>>>,
    reply_delay_ms: AtomicU64,
    inbound_tx: mpsc::Sender<InboundFrame>,
    link_tx: watch::Sender<LinkState>,
}

/// Scriptable peer link. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<MockLinkInner>,
}

impl MockLink {
    /// Create a link plus the inbound/link-state channels the router needs
    pub fn new(
        config: MockLinkConfig,
    ) -> (
        Self,
        mpsc::Receiver<InboundFrame>,
        watch::Receiver<LinkState>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer_size);
        let initial = LinkState {
            activated: true,
            reachable: config.reachable,
        };
        let (link_tx, link_rx) = watch::channel(initial);
        let link = Self {
            inner: Arc::new(MockLinkInner {
                supported: AtomicBool::new(config.supported),
                reachable: AtomicBool::new(config.reachable),
                fail_sends: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                reply: Mutex::new(None),
                reply_delay_ms: AtomicU64::new(config.reply_delay.as_millis() as u64),
                inbound_tx,
                link_tx,
                config,
            }),
        };
        (link, inbound_rx, link_rx)
    }

    /// Create a link with default (ideal) behavior
    pub fn ideal() -> (
        Self,
        mpsc::Receiver<InboundFrame>,
        watch::Receiver<LinkState>,
    ) {
        Self::new(MockLinkConfig::default())
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Flip reachability; publishes the change on the link-state channel
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        let _ = self.inner.link_tx.send(LinkState {
            activated: true,
            reachable,
        });
    }

    /// Make every subsequent send fail at the transport layer
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Script the reply for `send_with_reply`. Without a script, requests
    /// hang until their deadline — the "peer never answered" case.
    pub fn set_reply(
        &self,
        reply: impl Fn(&Payload) -> Result<Payload, TransportError> + Send + Sync + 'static,
    ) {
        *lock(&self.inner.reply) = Some(Box::new(reply));
    }

    /// Delay applied before a scripted reply resolves
    pub fn set_reply_delay(&self, delay: Duration) {
        self.inner
            .reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every payload the pipeline handed to the transport
    pub fn sent(&self) -> Vec<Payload> {
        lock(&self.inner.sent).clone()
    }

    /// Number of payloads handed to the transport
    pub fn sent_count(&self) -> usize {
        lock(&self.inner.sent).len()
    }

    // ------------------------------------------------------------------
    // Inbound Injection
    // ------------------------------------------------------------------

    /// Deliver a frame on the no-reply entry point
    pub async fn inject_inbound(&self, payload: Payload) -> bool {
        self.inner
            .inbound_tx
            .send(InboundFrame::notify(payload))
            .await
            .is_ok()
    }

    /// Deliver a frame on the reply-required entry point; the returned
    /// receiver resolves with the pipeline's reply frame
    pub async fn inject_inbound_expecting_reply(
        &self,
        payload: Payload,
    ) -> Option<oneshot::Receiver<Payload>> {
        let (frame, reply_rx) = InboundFrame::expecting_reply(payload);
        if self.inner.inbound_tx.send(frame).await.is_ok() {
            Some(reply_rx)
        } else {
            None
        }
    }

    fn should_drop(&self) -> bool {
        self.inner.config.loss_rate > 0.0 && fastrand::f64() < self.inner.config.loss_rate
    }
}

#[async_trait]
impl PeerLink for MockLink {
    fn is_supported(&self) -> bool {
        self.inner.supported.load(Ordering::SeqCst)
    }

    fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                reason: "scripted send failure".into(),
            });
        }
        if self.should_drop() {
            debug!("mock link dropped outbound payload");
            return Err(TransportError::DeliveryFailed {
                reason: "simulated packet loss".into(),
            });
        }
        lock(&self.inner.sent).push(payload);
        Ok(())
    }

    async fn send_with_reply(&self, payload: Payload) -> Result<Payload, TransportError> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                reason: "scripted send failure".into(),
            });
        }
        lock(&self.inner.sent).push(payload.clone());

        let delay = Duration::from_millis(self.inner.reply_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.inner.reply)
            .as_ref()
            .map(|script| script(&payload));
        match scripted {
            Some(result) => result,
            // no script: the peer never answers; hang until the caller's
            // deadline cancels this future
            None => std::future::pending().await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_records_payload() {
        let (link, _inbound, _state) = MockLink::ideal();
        let mut payload = Payload::new();
        payload.insert("heartRate".into(), json!(99));

        link.send(payload.clone()).await.expect("send accepted");
        assert_eq!(link.sent(), vec![payload]);
    }

    #[tokio::test]
    async fn test_reachability_published_on_watch() {
        let (link, _inbound, mut state) = MockLink::ideal();
        assert!(state.borrow().reachable);

        link.set_reachable(false);
        state.changed().await.expect("state update");
        assert!(!state.borrow().reachable);
    }

    #[tokio::test]
    async fn test_scripted_reply() {
        let (link, _inbound, _state) = MockLink::ideal();
        link.set_reply(|_request| {
            let mut reply = Payload::new();
            reply.insert("poolSize".into(), json!(50.0));
            Ok(reply)
        });

        let reply = link
            .send_with_reply(Payload::new())
            .await
            .expect("reply produced");
        assert_eq!(reply.get("poolSize"), Some(&json!(50.0)));
    }

    #[tokio::test]
    async fn test_failed_send_reports_error() {
        let (link, _inbound, _state) = MockLink::ideal();
        link.fail_sends(true);
        assert!(link.send(Payload::new()).await.is_err());
        assert_eq!(link.sent_count(), 0);
    }
}
