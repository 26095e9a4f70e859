//! In-memory loopback link pair
//!
//! Two [`PeerLink`]s wired back to back: what one end sends arrives as an
//! inbound frame at the other. Reply-capable sends carry their oneshot slot
//! across, so a full two-device pipeline (wrist + handheld) can run
//! request/reply round trips entirely in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use swimsync_core::platform::{InboundFrame, LinkState, PeerLink};
use swimsync_core::{Payload, TransportError};

// ----------------------------------------------------------------------------
// Loopback Link
// ----------------------------------------------------------------------------

/// One end of a loopback pair
pub struct LoopbackLink {
    /// Frames sent here arrive at the peer's router
    peer_inbound: mpsc::Sender<InboundFrame>,
    /// Shared flag: flipping it makes both ends unreachable
    reachable: Arc<AtomicBool>,
    link_tx: watch::Sender<LinkState>,
}

impl LoopbackLink {
    /// Flip reachability for this direction and publish the change
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        let _ = self.link_tx.send(LinkState {
            activated: true,
            reachable,
        });
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::Unreachable);
        }
        self.peer_inbound
            .send(InboundFrame::notify(payload))
            .await
            .map_err(|_| TransportError::DeliveryFailed {
                reason: "peer router gone".into(),
            })
    }

    async fn send_with_reply(&self, payload: Payload) -> Result<Payload, TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::Unreachable);
        }
        let (frame, reply_rx) = InboundFrame::expecting_reply(payload);
        self.peer_inbound
            .send(frame)
            .await
            .map_err(|_| TransportError::DeliveryFailed {
                reason: "peer router gone".into(),
            })?;
        reply_rx.await.map_err(|_| {
            debug!("peer dropped the reply slot");
            TransportError::DeliveryFailed {
                reason: "peer produced no reply".into(),
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Pair Construction
// ----------------------------------------------------------------------------

/// One end of the pair, bundled with the channels its router needs
pub struct LoopbackEnd {
    pub link: Arc<LoopbackLink>,
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub link_changes: watch::Receiver<LinkState>,
}

/// Build a connected pair of loopback ends
pub fn loopback_pair(buffer: usize) -> (LoopbackEnd, LoopbackEnd) {
    let (a_inbound_tx, a_inbound_rx) = mpsc::channel(buffer);
    let (b_inbound_tx, b_inbound_rx) = mpsc::channel(buffer);

    let a_reachable = Arc::new(AtomicBool::new(true));
    let b_reachable = Arc::new(AtomicBool::new(true));

    let (a_link_tx, a_link_rx) = watch::channel(LinkState::up());
    let (b_link_tx, b_link_rx) = watch::channel(LinkState::up());

    let a = LoopbackEnd {
        link: Arc::new(LoopbackLink {
            peer_inbound: b_inbound_tx,
            reachable: a_reachable,
            link_tx: a_link_tx,
        }),
        inbound: a_inbound_rx,
        link_changes: a_link_rx,
    };
    let b = LoopbackEnd {
        link: Arc::new(LoopbackLink {
            peer_inbound: a_inbound_tx,
            reachable: b_reachable,
            link_tx: b_link_tx,
        }),
        inbound: b_inbound_rx,
        link_changes: b_link_rx,
    };
    (a, b)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_crosses_to_the_other_end() {
        let (a, mut b) = loopback_pair(8);
        let mut payload = Payload::new();
        payload.insert("heartRate".into(), json!(80));

        a.link.send(payload.clone()).await.expect("delivered");
        let frame = b.inbound.recv().await.expect("frame arrives");
        assert_eq!(frame.payload, payload);
        assert!(frame.reply.is_none());
    }

    #[tokio::test]
    async fn test_reply_slot_crosses_and_resolves() {
        let (a, mut b) = loopback_pair(8);

        let request = tokio::spawn(async move { a.link.send_with_reply(Payload::new()).await });

        let frame = b.inbound.recv().await.expect("frame arrives");
        let reply_to = frame.reply.expect("reply slot present");
        let mut reply = Payload::new();
        reply.insert("ack".into(), json!(true));
        reply_to.send(reply).expect("reply accepted");

        let outcome = request.await.expect("task").expect("reply");
        assert_eq!(outcome.get("ack"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_unreachable_end_refuses_sends() {
        let (a, _b) = loopback_pair(8);
        a.link.set_reachable(false);
        assert!(a.link.send(Payload::new()).await.is_err());
    }
}
