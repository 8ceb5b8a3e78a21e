//! [`Host`] backed by the hosting browser over the bridge socket. One host
//! connection serves all coordinator traffic; commands are correlated by id
//! and raced against a call timeout so a dead browser side cannot wedge the
//! capture pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use snaptrail_engine::host::{
    DownloadRequest, Host, HostError, OverlayPlan, OverlayProbe, PageSnapshot, TabRef,
    classify_host_error,
};

use crate::wire::{
    CaptureVisibleCmd, ClearOverlayCmd, DownloadCmd, HostCommand, HostCommandFrame,
    HostReplyFrame, NotifyCmd, PageSnapshotCmd, ProbeOverlayCmd, SetIconCmd, ShowOverlayCmd,
    TabInfoCmd,
};

const ATTACH_WAIT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

struct HostInner {
    sink: Mutex<Option<mpsc::Sender<HostCommandFrame>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<HostReplyFrame>>>,
    next_id: AtomicU64,
    attach_wait: Duration,
    call_timeout: Duration,
}

#[derive(Clone)]
pub struct RemoteHost {
    inner: Arc<HostInner>,
}

impl Default for RemoteHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteHost {
    pub fn new() -> Self {
        Self::with_timeouts(ATTACH_WAIT, CALL_TIMEOUT)
    }

    pub fn with_timeouts(attach_wait: Duration, call_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HostInner {
                sink: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                attach_wait,
                call_timeout,
            }),
        }
    }

    /// Binds the browser connection's outbound channel. A reconnect simply
    /// replaces the previous channel.
    pub async fn attach(&self, tx: mpsc::Sender<HostCommandFrame>) {
        let previous = self.inner.sink.lock().await.replace(tx);
        if previous.is_some() {
            warn!("host connection replaced while one was attached");
        } else {
            info!("host connection attached");
        }
    }

    /// Drops the browser connection. In-flight calls fail with
    /// [`HostError::ConnectionLost`].
    pub async fn detach(&self) {
        self.inner.sink.lock().await.take();
        let dropped = {
            let mut pending = self.inner.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            warn!(dropped, "host connection lost with calls in flight");
        } else {
            info!("host connection detached");
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.sink.lock().await.is_some()
    }

    /// Completes the pending call a reply correlates to. Unmatched ids are
    /// dropped; the call they belonged to has already timed out.
    pub async fn resolve(&self, reply: HostReplyFrame) {
        let waiter = self.inner.pending.lock().await.remove(&reply.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id = reply.id, "reply for unknown call id ignored"),
        }
    }

    /// Waits for the browser side to connect, up to the attach window.
    async fn sender(&self) -> Result<mpsc::Sender<HostCommandFrame>, HostError> {
        let deadline = tokio::time::Instant::now() + self.inner.attach_wait;
        loop {
            if let Some(tx) = self.inner.sink.lock().await.clone() {
                return Ok(tx);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HostError::NotReady);
            }
            debug!("waiting for the browser host to connect");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn call(&self, command: HostCommand) -> Result<Option<Value>, HostError> {
        let tx = self.sender().await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, reply_tx);

        if tx.send(HostCommandFrame { id, command }).await.is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(HostError::ConnectionLost);
        }

        let reply = match tokio::time::timeout(self.inner.call_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(HostError::ConnectionLost),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                return Err(HostError::Timeout(self.inner.call_timeout.as_millis() as u64));
            }
        };

        if reply.ok {
            Ok(reply.data)
        } else {
            let message = reply
                .error
                .unwrap_or_else(|| "unspecified host failure".to_string());
            Err(classify_host_error(&message))
        }
    }
}

fn decode<T: DeserializeOwned>(data: Option<Value>, what: &str) -> Result<T, HostError> {
    let value = data.ok_or_else(|| HostError::Other(format!("missing {} payload", what)))?;
    serde_json::from_value(value)
        .map_err(|err| HostError::Other(format!("malformed {} payload: {}", what, err)))
}

#[async_trait]
impl Host for RemoteHost {
    async fn active_tab(&self) -> Result<Option<TabRef>, HostError> {
        match self.call(HostCommand::QueryActiveTab).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(decode(Some(value), "tab")?)),
        }
    }

    async fn tab_info(&self, tab_id: u32) -> Result<TabRef, HostError> {
        let data = self.call(HostCommand::TabInfo(TabInfoCmd { tab_id })).await?;
        decode(data, "tab")
    }

    async fn capture_visible(&self, window_id: u32) -> Result<Vec<u8>, HostError> {
        let data = self
            .call(HostCommand::CaptureVisible(CaptureVisibleCmd { window_id }))
            .await?;
        let encoded: String = decode(data, "image")?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| HostError::Other(format!("base64 decode failed: {}", err)))
    }

    async fn download(&self, request: DownloadRequest) -> Result<(), HostError> {
        self.call(HostCommand::Download(DownloadCmd {
            path: request.path,
            mime: request.mime,
            data: STANDARD.encode(&request.data),
        }))
        .await?;
        Ok(())
    }

    async fn notify(&self, title: &str, message: &str) -> Result<(), HostError> {
        self.call(HostCommand::Notify(NotifyCmd {
            title: title.to_string(),
            message: message.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn set_icon(&self, recording: bool) -> Result<(), HostError> {
        self.call(HostCommand::SetIcon(SetIconCmd { recording })).await?;
        Ok(())
    }

    async fn page_snapshot(&self, tab_id: u32) -> Result<PageSnapshot, HostError> {
        let data = self
            .call(HostCommand::PageSnapshot(PageSnapshotCmd { tab_id }))
            .await?;
        decode(data, "snapshot")
    }

    async fn show_overlay(&self, tab_id: u32, plan: &OverlayPlan) -> Result<(), HostError> {
        self.call(HostCommand::ShowOverlay(ShowOverlayCmd {
            tab_id,
            plan: plan.clone(),
        }))
        .await?;
        Ok(())
    }

    async fn probe_overlay(&self, tab_id: u32) -> Result<OverlayProbe, HostError> {
        let data = self
            .call(HostCommand::ProbeOverlay(ProbeOverlayCmd { tab_id }))
            .await?;
        decode(data, "probe")
    }

    async fn clear_overlay(&self, tab_id: u32) -> Result<(), HostError> {
        self.call(HostCommand::ClearOverlay(ClearOverlayCmd { tab_id }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calls_fail_not_ready_when_nothing_attaches() {
        let host = RemoteHost::with_timeouts(Duration::from_millis(50), Duration::from_millis(50));
        let err = host.active_tab().await.unwrap_err();
        assert_eq!(err, HostError::NotReady);
    }

    #[tokio::test]
    async fn replies_correlate_by_id() {
        let host = RemoteHost::with_timeouts(Duration::from_millis(200), Duration::from_secs(2));
        let (tx, mut rx) = mpsc::channel(4);
        host.attach(tx).await;

        let responder = host.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let reply = match frame.command {
                    HostCommand::QueryActiveTab => HostReplyFrame {
                        id: frame.id,
                        ok: true,
                        data: Some(serde_json::json!({
                            "id": 5,
                            "windowId": 2,
                            "url": "https://example.com/",
                            "title": "Example",
                        })),
                        error: None,
                    },
                    _ => HostReplyFrame {
                        id: frame.id,
                        ok: false,
                        data: None,
                        error: Some("No tab with id".to_string()),
                    },
                };
                responder.resolve(reply).await;
            }
        });

        let tab = host.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.id, 5);
        assert_eq!(tab.window_id, Some(2));

        let err = host.tab_info(99).await.unwrap_err();
        assert!(matches!(err, HostError::TabNotVisible(_)));
    }

    #[tokio::test]
    async fn detach_fails_calls_in_flight() {
        let host = RemoteHost::with_timeouts(Duration::from_millis(200), Duration::from_secs(5));
        let (tx, mut rx) = mpsc::channel(4);
        host.attach(tx).await;

        let detacher = host.clone();
        tokio::spawn(async move {
            // Swallow the command, then drop the connection instead of
            // replying.
            let _ = rx.recv().await;
            detacher.detach().await;
        });

        let err = host.set_icon(true).await.unwrap_err();
        assert_eq!(err, HostError::ConnectionLost);
    }

    #[tokio::test]
    async fn silent_host_times_out() {
        let host = RemoteHost::with_timeouts(Duration::from_millis(200), Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(4);
        host.attach(tx).await;

        let err = host.notify("t", "m").await.unwrap_err();
        assert_eq!(err, HostError::Timeout(100));
    }
}
