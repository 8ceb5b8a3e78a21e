//! The bridge endpoint: one WebSocket port shared by every browser-side
//! shim. A `page` peer gets its own server-side [`PageObserver`] wired to the
//! coordinator; the `host` peer attaches to the shared [`RemoteHost`] and
//! answers browser commands.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use snaptrail_common::element::ElementRect;
use snaptrail_common::protocol::{Reply, Request};
use snaptrail_engine::broadcast::PageEnvelope;
use snaptrail_engine::coordinator::Coordinator;
use snaptrail_engine::host::TabRef;
use snaptrail_observer::{
    CoordinatorLink, LinkError, ObserverConfig, PageObserver, PageSurface, Tone,
};

use crate::host::RemoteHost;
use crate::wire::{FromPage, Hello, HostReplyFrame, Role, SurfaceFrame, ToPage};

type Ws = WebSocketStream<TcpStream>;

/// In-process link from a page's observer to the coordinator. Requests carry
/// the page's tab as the sender so captures resolve against the right tab.
struct LocalLink {
    coordinator: Coordinator,
    tab: Arc<Mutex<Option<TabRef>>>,
}

#[async_trait]
impl CoordinatorLink for LocalLink {
    async fn ask(&self, request: Request) -> Result<Reply, LinkError> {
        let sender = self.tab.lock().await.clone();
        Ok(self.coordinator.handle_from(request, sender).await)
    }
}

/// Page surface rendered remotely: every operation becomes a frame on the
/// page's socket. Frames are dropped, not queued, when the socket is backed
/// up; a page that cannot drain its socket is not rendering anyway.
struct WsPageSurface {
    out: mpsc::Sender<ToPage>,
}

impl WsPageSurface {
    fn send(&self, frame: SurfaceFrame) {
        if let Err(err) = self.out.try_send(ToPage::Surface(frame)) {
            debug!(error = %err, "surface frame dropped");
        }
    }
}

#[async_trait]
impl PageSurface for WsPageSurface {
    async fn mount_capture_button(&self) {
        self.send(SurfaceFrame::MountCaptureButton);
    }

    async fn remove_capture_button(&self) {
        self.send(SurfaceFrame::RemoveCaptureButton);
    }

    async fn toast(&self, message: &str, tone: Tone) {
        self.send(SurfaceFrame::Toast {
            message: message.to_string(),
            tone,
        });
    }

    async fn flash(&self, rect: ElementRect) {
        self.send(SurfaceFrame::Flash { rect });
    }
}

#[derive(Clone)]
pub struct RecorderServer {
    port: u16,
}

pub struct ServerHandle {
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections. Established connections close when
    /// their peers disconnect.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl RecorderServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn start(
        &self,
        coordinator: Coordinator,
        host: RemoteHost,
    ) -> std::io::Result<ServerHandle> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("recorder bridge listening on: {}", local_addr);
        println!("INFO: Recorder bridge listening on: {}", local_addr);

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(peer) = stream.peer_addr() {
                    debug!(%peer, "accepted tcp connection");
                }
                tokio::spawn(handle_connection(
                    stream,
                    coordinator.clone(),
                    host.clone(),
                ));
            }
        });

        Ok(ServerHandle {
            accept_task,
            local_addr,
        })
    }
}

async fn handle_connection(stream: TcpStream, coordinator: Coordinator, host: RemoteHost) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            error!(error = %err, "websocket handshake failed");
            return;
        }
    };

    // The first text frame declares the peer's role.
    let hello = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Hello>(&text) {
                Ok(hello) => break hello,
                Err(err) => {
                    warn!(error = %err, "malformed hello frame, closing");
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(error = %err, "websocket error before hello");
                return;
            }
        }
    };

    match hello.role {
        Role::Page => page_connection(hello, ws, coordinator).await,
        Role::Host => host_connection(ws, host).await,
    }
}

async fn page_connection(hello: Hello, ws: Ws, coordinator: Coordinator) {
    let url = hello.url.unwrap_or_default();
    let title = hello.title.unwrap_or_default();
    info!(url = %url, tab = ?hello.tab_id, "page connected");

    let tab = hello.tab_id.map(|id| TabRef {
        id,
        window_id: None,
        url: url.clone(),
        title,
    });
    let shared_tab = Arc::new(Mutex::new(tab));

    let (out_tx, mut out_rx) = mpsc::channel::<ToPage>(32);
    let link = Arc::new(LocalLink {
        coordinator: coordinator.clone(),
        tab: shared_tab.clone(),
    });
    let surface = Arc::new(WsPageSurface { out: out_tx.clone() });
    let observer = PageObserver::new(link, surface, ObserverConfig::default());

    let (push_tx, mut push_rx) = mpsc::channel::<PageEnvelope>(8);
    let peer = coordinator.pages().register(url, push_tx).await;

    if let Err(err) = observer.init().await {
        warn!(error = %err, "observer initialization failed");
    }

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            // Coordinator push: the observer applies it and produces the
            // ack, then the push is mirrored to the shim.
            Some(envelope) = push_rx.recv() => {
                let push = envelope.push.clone();
                let ack = observer.handle_push(envelope.push).await;
                let _ = envelope.ack.send(ack);
                if let Err(err) = out_tx.try_send(ToPage::Push { push }) {
                    debug!(error = %err, "push mirror dropped");
                }
            }

            // Single writer for everything outbound on this socket.
            Some(frame) = out_rx.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(err) => {
                        error!(error = %err, "frame serialization failed");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<FromPage>(&text) {
                            Ok(FromPage::Event { payload }) => {
                                // Captures are slow; never stall the socket
                                // loop on one.
                                let observer = observer.clone();
                                tokio::spawn(async move {
                                    observer.on_dom_event(payload).await;
                                });
                            }
                            Ok(FromPage::FabClick) => {
                                let observer = observer.clone();
                                tokio::spawn(async move {
                                    observer.capture_manual().await;
                                });
                            }
                            Ok(FromPage::Navigated { url, title }) => {
                                debug!(url = %url, "page navigated");
                                coordinator.pages().set_url(peer, url.clone()).await;
                                let mut tab = shared_tab.lock().await;
                                if let Some(tab) = tab.as_mut() {
                                    tab.url = url;
                                    tab.title = title;
                                }
                            }
                            Err(err) => warn!(error = %err, "malformed page frame ignored"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "page websocket error");
                        break;
                    }
                }
            }
        }
    }

    coordinator.pages().unregister(peer).await;
    observer.shutdown().await;
    info!(peer, "page connection closed");
}

async fn host_connection(ws: Ws, host: RemoteHost) {
    info!("host connected");
    let (cmd_tx, mut cmd_rx) = mpsc::channel(32);
    host.attach(cmd_tx).await;

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            Some(frame) = cmd_rx.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(err) => {
                        error!(error = %err, "command serialization failed");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(json)).await {
                    error!(error = %err, "failed to send command to host");
                    break;
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<HostReplyFrame>(&text) {
                            Ok(reply) => host.resolve(reply).await,
                            Err(err) => warn!(error = %err, "malformed host reply ignored"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "host websocket error");
                        break;
                    }
                }
            }
        }
    }

    host.detach().await;
    info!("host connection closed");
}
