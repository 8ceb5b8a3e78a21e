//! Frames spoken over the bridge WebSocket. Every peer opens with a [`Hello`]
//! declaring its role: `page` connections carry raw interactions up and
//! surface operations down, the single `host` connection carries browser
//! commands down and their correlated replies up.

use serde::{Deserialize, Serialize};

use snaptrail_common::element::ElementRect;
use snaptrail_common::protocol::PagePush;
use snaptrail_engine::host::OverlayPlan;
use snaptrail_observer::events::DomEvent;
use snaptrail_observer::surface::Tone;

/// First text frame on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Page,
    Host,
}

/// Frames a page shim sends after its hello. The shim forwards raw
/// interactions without judging them; filtering and rate limiting happen in
/// the server-side observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromPage {
    Event {
        payload: DomEvent,
    },
    /// The floating capture button was pressed.
    FabClick,
    /// An in-page navigation changed the page's location.
    Navigated {
        url: String,
        #[serde(default)]
        title: String,
    },
}

/// Frames the bridge sends to a page shim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToPage {
    /// Session push, mirrored to the shim after the server-side observer has
    /// applied it. Informational; the observer state is authoritative.
    Push { push: PagePush },
    Surface(SurfaceFrame),
}

/// In-page surface operations; the shim renders these and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SurfaceFrame {
    MountCaptureButton,
    RemoveCaptureButton,
    Toast { message: String, tone: Tone },
    Flash { rect: ElementRect },
}

/// One browser command, correlated by `id`. The command carries its own tag
/// inline, so the frame reads flat on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCommandFrame {
    pub id: u64,
    #[serde(flatten)]
    pub command: HostCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostCommand {
    QueryActiveTab,
    TabInfo(TabInfoCmd),
    CaptureVisible(CaptureVisibleCmd),
    Download(DownloadCmd),
    Notify(NotifyCmd),
    SetIcon(SetIconCmd),
    PageSnapshot(PageSnapshotCmd),
    ShowOverlay(ShowOverlayCmd),
    ProbeOverlay(ProbeOverlayCmd),
    ClearOverlay(ClearOverlayCmd),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfoCmd {
    pub tab_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureVisibleCmd {
    pub window_id: u32,
}

/// Artifact write through the browser's download surface. `data` is the
/// base64-encoded body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadCmd {
    pub path: String,
    pub mime: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyCmd {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIconCmd {
    pub recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshotCmd {
    pub tab_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowOverlayCmd {
    pub tab_id: u32,
    pub plan: OverlayPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOverlayCmd {
    pub tab_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearOverlayCmd {
    pub tab_id: u32,
}

/// Reply to one command, correlated by `id`. `data` is command-specific:
/// a tab object, a base64 image string, a snapshot, a probe, or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReplyFrame {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
