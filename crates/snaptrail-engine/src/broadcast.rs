//! Fan-out of session state to registered pages. Every delivery is raced
//! against a per-page window and the whole broadcast settles regardless of
//! individual outcomes; a page that never acks cannot stall a session end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

use snaptrail_common::naming;
use snaptrail_common::protocol::{PagePush, PushAck};

pub type PeerId = u64;

/// A push plus the ack channel the receiving page completes.
pub struct PageEnvelope {
    pub push: PagePush,
    pub ack: oneshot::Sender<PushAck>,
}

struct PagePeer {
    url: String,
    tx: mpsc::Sender<PageEnvelope>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub failed: usize,
    /// Pages on internal URLs are skipped without an attempt.
    pub skipped: usize,
}

#[derive(Default)]
struct RegistryInner {
    next_id: PeerId,
    peers: HashMap<PeerId, PagePeer>,
}

/// Registry of connected pages. Cloneable handle; the bridge registers a peer
/// per page connection and the coordinator broadcasts through it.
#[derive(Clone, Default)]
pub struct PageRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        url: impl Into<String>,
        tx: mpsc::Sender<PageEnvelope>,
    ) -> PeerId {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.peers.insert(
            id,
            PagePeer {
                url: url.into(),
                tx,
            },
        );
        id
    }

    pub async fn unregister(&self, id: PeerId) {
        self.inner.lock().await.peers.remove(&id);
    }

    /// Updates a peer's URL after an in-page navigation.
    pub async fn set_url(&self, id: PeerId, url: impl Into<String>) {
        if let Some(peer) = self.inner.lock().await.peers.get_mut(&id) {
            peer.url = url.into();
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.lock().await.peers.len()
    }

    /// Sends `push` to every registered page, racing each delivery (send plus
    /// ack) against `window`. Failures are counted, never propagated.
    pub async fn broadcast(&self, push: PagePush, window: Duration) -> BroadcastSummary {
        let mut summary = BroadcastSummary::default();
        let targets: Vec<(PeerId, mpsc::Sender<PageEnvelope>)> = {
            let inner = self.inner.lock().await;
            inner
                .peers
                .iter()
                .filter(|(id, peer)| {
                    if naming::is_internal_url(&peer.url) {
                        debug!(peer = **id, url = %peer.url, "skipping internal page");
                        summary.skipped += 1;
                        false
                    } else {
                        true
                    }
                })
                .map(|(id, peer)| (*id, peer.tx.clone()))
                .collect()
        };

        let deliveries = targets.into_iter().map(|(id, tx)| {
            let push = push.clone();
            async move {
                let (ack_tx, ack_rx) = oneshot::channel();
                let envelope = PageEnvelope {
                    push,
                    ack: ack_tx,
                };
                let delivered = tokio::time::timeout(window, async move {
                    if tx.send(envelope).await.is_err() {
                        return false;
                    }
                    ack_rx.await.is_ok()
                })
                .await
                .unwrap_or(false);
                (id, delivered)
            }
        });

        for (id, delivered) in join_all(deliveries).await {
            if delivered {
                summary.delivered += 1;
            } else {
                debug!(peer = id, "page did not ack within the delivery window");
                summary.failed += 1;
            }
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            "session state broadcast settled"
        );
        summary
    }
}
