//! Cross-device shared session state
//!
//! Single source of truth for the session parameters, safe for concurrent
//! access from the bus router (inbound messages), the sensor delivery task
//! (derived updates), and user-initiated calls. Every field has its own
//! exclusive lock so unrelated fields never contend; notifications are
//! emitted strictly after the lock is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use swimsync_core::config::{RequestConfig, SwimsyncConfig};
use swimsync_core::{MessageKind, PeerMessage, RequestError, SessionParameters, SwimStyle};

use crate::bus::MessageBus;

// ----------------------------------------------------------------------------
// Change Notifications
// ----------------------------------------------------------------------------

/// Emitted after a field actually changed value, or on a full reset
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateChange {
    PoolLength(f64),
    Style(SwimStyle),
    TargetDistance(u32),
    Ready(bool),
    /// Everything returned to defaults; derived ledgers must clear
    Reset,
}

// ----------------------------------------------------------------------------
// Shared Session State
// ----------------------------------------------------------------------------

struct StateInner {
    // One lock per field: pool length and readiness must never contend.
    pool_length: Mutex<f64>,
    style: Mutex<SwimStyle>,
    target_distance: Mutex<u32>,
    is_ready: Mutex<bool>,
    /// In-flight guard for the pool-length request
    pending_request: AtomicBool,
    /// Generation counter so a stale fallback timer cannot clear a newer
    /// request's flag
    pending_epoch: AtomicU64,
    changes: broadcast::Sender<StateChange>,
    bus: MessageBus,
    request: RequestConfig,
}

/// Thread-safe mutable store of the session parameters, mirrored across
/// devices via the MessageBus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SharedSessionState {
    inner: Arc<StateInner>,
}

impl SharedSessionState {
    /// Create the store with the documented defaults
    pub fn new(bus: MessageBus, config: &SwimsyncConfig) -> Self {
        let (changes, _) = broadcast::channel(config.channels.notification_buffer_size);
        Self {
            inner: Arc::new(StateInner {
                pool_length: Mutex::new(config.defaults.pool_length),
                style: Mutex::new(config.defaults.style),
                target_distance: Mutex::new(config.defaults.target_distance),
                is_ready: Mutex::new(false),
                pending_request: AtomicBool::new(false),
                pending_epoch: AtomicU64::new(0),
                changes,
                bus,
                request: config.request.clone(),
            }),
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn pool_length(&self) -> f64 {
        *lock(&self.inner.pool_length)
    }

    pub fn style(&self) -> SwimStyle {
        *lock(&self.inner.style)
    }

    pub fn target_distance(&self) -> u32 {
        *lock(&self.inner.target_distance)
    }

    pub fn is_ready(&self) -> bool {
        *lock(&self.inner.is_ready)
    }

    /// Snapshot of the full parameter set
    pub fn parameters(&self) -> SessionParameters {
        SessionParameters {
            pool_length: self.pool_length(),
            style: self.style(),
            target_distance: self.target_distance(),
            is_ready: self.is_ready(),
        }
    }

    // ------------------------------------------------------------------
    // Local Setters (mirror to the peer, best effort)
    // ------------------------------------------------------------------

    /// Set the pool length locally and mirror it to the peer
    pub async fn set_pool_length(&self, meters: f64) -> bool {
        if meters <= 0.0 {
            warn!(meters, "ignoring non-positive pool length");
            return false;
        }
        let changed = self.apply_pool_length(meters);
        if changed {
            let _ = self
                .inner
                .bus
                .publish(PeerMessage::PoolLength { meters })
                .await;
        }
        changed
    }

    /// Set the stroke style locally and mirror it to the peer
    pub async fn set_style(&self, style: SwimStyle) -> bool {
        let changed = self.apply_style(style);
        if changed {
            let _ = self.inner.bus.publish(PeerMessage::SwimmingStyle(style)).await;
        }
        changed
    }

    /// Set the target distance locally and mirror it to the peer
    pub async fn set_target_distance(&self, meters: u32) -> bool {
        let changed = self.apply_target_distance(meters);
        if changed {
            let _ = self
                .inner
                .bus
                .publish(PeerMessage::TargetDistance(meters))
                .await;
        }
        changed
    }

    // ------------------------------------------------------------------
    // Field Application (no mirroring; used by inbound apply too)
    // ------------------------------------------------------------------

    // Setter discipline, every field: acquire lock → read old → write new →
    // release → compare outside the lock → notify if changed. Emitting while
    // locked would let a subscriber's reentrant read deadlock the writer.

    fn apply_pool_length(&self, meters: f64) -> bool {
        let old = {
            let mut guard = lock(&self.inner.pool_length);
            let old = *guard;
            *guard = meters;
            old
        };
        let changed = old != meters;
        if changed {
            let _ = self.inner.changes.send(StateChange::PoolLength(meters));
        }
        changed
    }

    fn apply_style(&self, style: SwimStyle) -> bool {
        let old = {
            let mut guard = lock(&self.inner.style);
            let old = *guard;
            *guard = style;
            old
        };
        let changed = old != style;
        if changed {
            let _ = self.inner.changes.send(StateChange::Style(style));
        }
        changed
    }

    fn apply_target_distance(&self, meters: u32) -> bool {
        let old = {
            let mut guard = lock(&self.inner.target_distance);
            let old = *guard;
            *guard = meters;
            old
        };
        let changed = old != meters;
        if changed {
            let _ = self.inner.changes.send(StateChange::TargetDistance(meters));
        }
        changed
    }

    fn apply_ready(&self, ready: bool) -> bool {
        let old = {
            let mut guard = lock(&self.inner.is_ready);
            let old = *guard;
            *guard = ready;
            old
        };
        let changed = old != ready;
        if changed {
            let _ = self.inner.changes.send(StateChange::Ready(ready));
        }
        changed
    }

    // ------------------------------------------------------------------
    // Peer Requests
    // ------------------------------------------------------------------

    /// Request the full parameter set from the peer.
    ///
    /// A successful response updates pool length, style, and target distance
    /// and only then flips readiness on. A response explicitly flagging
    /// "parameters not set" clears readiness and touches nothing else.
    /// Failure and timeout leave every field untouched.
    pub async fn request_all_parameters(&self) -> bool {
        let Some(payload) = self
            .inner
            .bus
            .request(PeerMessage::AllParametersRequest, self.inner.request.default_timeout)
            .await
        else {
            debug!("parameter request failed or timed out");
            return false;
        };

        match PeerMessage::classify(&payload) {
            PeerMessage::AllParameters {
                pool_length,
                style,
                target_distance,
            } => {
                self.apply_pool_length(pool_length);
                self.apply_style(style);
                self.apply_target_distance(target_distance);
                // readiness flips only after every field landed
                self.apply_ready(true);
                true
            }
            PeerMessage::ParametersUnset => {
                // partial responses must not partially flip readiness
                self.apply_ready(false);
                false
            }
            other => {
                debug!(kind = ?other.kind(), "unexpected reply to parameter request");
                false
            }
        }
    }

    /// Request only the pool length from the peer.
    ///
    /// Guarded by a single in-flight flag: a second call while one is
    /// outstanding returns false without issuing a duplicate request. The
    /// flag clears on success, on failure, and — defensively — by a fixed
    /// fallback timer in case the bus's own timeout path is starved.
    pub async fn request_pool_length(&self) -> bool {
        if self
            .inner
            .pending_request
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(error = %RequestError::AlreadyPending, "pool length request rejected");
            return false;
        }
        let epoch = self.inner.pending_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let fallback = self.inner.request.pending_fallback();
        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(fallback).await;
            if state.inner.pending_epoch.load(Ordering::SeqCst) == epoch
                && state.inner.pending_request.swap(false, Ordering::SeqCst)
            {
                warn!("pool length in-flight flag cleared by fallback timer");
            }
        });

        let reply = self
            .inner
            .bus
            .request(PeerMessage::PoolLengthRequest, self.inner.request.default_timeout)
            .await;

        let updated = match reply.as_ref().map(PeerMessage::classify) {
            Some(PeerMessage::PoolLength { meters }) => {
                self.apply_pool_length(meters);
                true
            }
            // the peer may answer with its full parameter set; the key
            // heuristic classifies it, and the pool length is still there
            Some(PeerMessage::AllParameters { pool_length, .. }) => {
                self.apply_pool_length(pool_length);
                true
            }
            Some(other) => {
                debug!(kind = ?other.kind(), "unexpected reply to pool length request");
                false
            }
            None => false,
        };

        self.inner.pending_request.store(false, Ordering::SeqCst);
        updated
    }

    /// Whether a pool-length request is currently outstanding
    pub fn has_pending_request(&self) -> bool {
        self.inner.pending_request.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------

    /// Restore every field to its documented default and signal derived
    /// ledgers to clear. Safe to call even when no session was ever started.
    pub fn reset_ready_state(&self) {
        let defaults = SessionParameters::default();
        self.apply_pool_length(defaults.pool_length);
        self.apply_style(defaults.style);
        self.apply_target_distance(defaults.target_distance);
        self.apply_ready(false);
        self.inner.pending_request.store(false, Ordering::SeqCst);
        let _ = self.inner.changes.send(StateChange::Reset);
    }

    // ------------------------------------------------------------------
    // Inbound Application
    // ------------------------------------------------------------------

    /// Spawn the task applying inbound parameter messages from the peer.
    /// Applies through the same field setters as local mutation, without
    /// re-mirroring (no echo loop).
    pub fn spawn_inbound_apply(&self) -> JoinHandle<()> {
        let (_pool_id, mut pool_rx) = self.inner.bus.subscribe(MessageKind::PoolLength);
        let (_style_id, mut style_rx) = self.inner.bus.subscribe(MessageKind::SwimmingStyle);
        let (_distance_id, mut distance_rx) = self.inner.bus.subscribe(MessageKind::TargetDistance);
        let (_params_id, mut params_rx) = self.inner.bus.subscribe(MessageKind::AllParameters);
        let state = self.clone();

        tokio::spawn(async move {
            debug!("state inbound-apply task starting");
            loop {
                tokio::select! {
                    message = pool_rx.recv() => {
                        let Some(PeerMessage::PoolLength { meters }) = message else { break };
                        state.apply_pool_length(meters);
                    }
                    message = style_rx.recv() => {
                        let Some(PeerMessage::SwimmingStyle(style)) = message else { break };
                        state.apply_style(style);
                    }
                    message = distance_rx.recv() => {
                        let Some(PeerMessage::TargetDistance(meters)) = message else { break };
                        state.apply_target_distance(meters);
                    }
                    message = params_rx.recv() => {
                        match message {
                            Some(PeerMessage::AllParameters { pool_length, style, target_distance }) => {
                                state.apply_pool_length(pool_length);
                                state.apply_style(style);
                                state.apply_target_distance(target_distance);
                                state.apply_ready(true);
                            }
                            Some(PeerMessage::ParametersUnset) => {
                                state.apply_ready(false);
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
            debug!("state inbound-apply task stopped");
        })
    }
}

/// Mutex poisoning only occurs after a panic in a holder; recover the data
/// rather than propagating the poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use swimsync_core::{Payload, TransportError};

    struct SilentLink {
        reachable: AtomicBool,
        sends: AtomicU64,
    }

    impl SilentLink {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                sends: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl swimsync_core::PeerLink for SilentLink {
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
            futures::future::pending().await
        }
    }

    fn state_over(link: Arc<SilentLink>) -> SharedSessionState {
        let config = SwimsyncConfig::testing();
        let bus = MessageBus::new(link, &config);
        SharedSessionState::new(bus, &config)
    }

    #[tokio::test]
    async fn test_setter_notifies_only_on_change() {
        let state = state_over(SilentLink::new(false));
        let mut changes = state.subscribe();

        assert!(state.apply_pool_length(50.0));
        assert_eq!(changes.try_recv().ok(), Some(StateChange::PoolLength(50.0)));

        // same value again: no notification
        assert!(!state.apply_pool_length(50.0));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_restores_documented_defaults() {
        let state = state_over(SilentLink::new(false));

        state.apply_pool_length(50.0);
        state.apply_style(SwimStyle::Fly);
        state.apply_target_distance(1500);
        state.apply_ready(true);

        state.reset_ready_state();
        let params = state.parameters();
        assert_eq!(params.pool_length, 25.0);
        assert_eq!(params.style.code(), 0);
        assert_eq!(params.target_distance, 0);
        assert!(!params.is_ready);
        assert!(!state.has_pending_request());
    }

    #[tokio::test]
    async fn test_reset_emits_reset_notification() {
        let state = state_over(SilentLink::new(false));
        let mut changes = state.subscribe();

        state.reset_ready_state();
        let mut saw_reset = false;
        while let Ok(change) = changes.try_recv() {
            if change == StateChange::Reset {
                saw_reset = true;
            }
        }
        assert!(saw_reset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_exclusivity() {
        let state = state_over(SilentLink::new(true));

        let racing = state.clone();
        let first = tokio::spawn(async move { racing.request_pool_length().await });
        // let the first call take the in-flight flag
        tokio::task::yield_now().await;

        assert!(!state.request_pool_length().await, "second call rejected");
        assert!(!first.await.expect("first call completed"), "no reply, so false");
        assert!(!state.has_pending_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_request_leaves_fields_untouched() {
        let state = state_over(SilentLink::new(true));
        state.apply_pool_length(33.0);

        assert!(!state.request_all_parameters().await);
        assert_eq!(state.pool_length(), 33.0);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_unreachable_request_collapses_to_failure() {
        // request and timeout share one failure shape: flag cleared,
        // values untouched
        let state = state_over(SilentLink::new(false));
        assert!(!state.request_pool_length().await);
        assert!(!state.has_pending_request());
        assert_eq!(state.pool_length(), 25.0);
    }
}
