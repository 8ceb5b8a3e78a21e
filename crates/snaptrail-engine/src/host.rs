use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use snaptrail_common::element::{ClickPoint, ElementRect};

/// Failures surfaced by the hosting browser. `classify_host_error` folds raw
/// host message text into this taxonomy so the capture pipeline can react per
/// kind instead of string-matching at every call site.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("tab not visible: {0}")]
    TabNotVisible(String),

    #[error("window unavailable: {0}")]
    WindowUnavailable(String),

    #[error("internal page cannot be captured: {0}")]
    InternalPage(String),

    #[error("host is not connected yet")]
    NotReady,

    #[error("host connection lost")]
    ConnectionLost,

    #[error("host call timed out after {0}ms")]
    Timeout(u64),

    #[error("operation not supported by this host: {0}")]
    NotSupported(&'static str),

    #[error("host error: {0}")]
    Other(String),
}

/// Maps raw failure text from the hosting browser onto [`HostError`].
/// Pattern order matters: the most specific classes are checked first.
pub fn classify_host_error(message: &str) -> HostError {
    let lower = message.to_lowercase();

    if lower.contains("permission")
        || lower.contains("activetab")
        || lower.contains("cannot access")
        || lower.contains("not allowed")
    {
        HostError::PermissionDenied(message.to_string())
    } else if lower.contains("cannot be captured")
        || lower.contains("chrome://")
        || lower.contains("internal page")
    {
        HostError::InternalPage(message.to_string())
    } else if lower.contains("no window") || lower.contains("window with id") || lower.contains("minimized")
    {
        HostError::WindowUnavailable(message.to_string())
    } else if lower.contains("no tab")
        || lower.contains("tab with id")
        || lower.contains("not visible")
        || lower.contains("no active tab")
    {
        HostError::TabNotVisible(message.to_string())
    } else {
        HostError::Other(message.to_string())
    }
}

/// A browser tab as the host reports it. The window id is resolved lazily;
/// captures re-query the host when it is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabRef {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u32>,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Fire-and-forget artifact persistence through the host's download surface.
/// `path` is relative to the host's download root and may contain folders.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub path: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl DownloadRequest {
    pub fn png(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mime: "image/png".to_string(),
            data,
        }
    }

    pub fn json(path: impl Into<String>, body: String) -> Self {
        Self {
            path: path.into(),
            mime: "application/json".to_string(),
            data: body.into_bytes(),
        }
    }
}

/// Page geometry used by the overlay lookup strategies: the viewport and the
/// rects of candidate elements, as the page context reports them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PageSnapshot {
    pub viewport: Viewport,
    pub elements: Vec<SnapshotElement>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotElement {
    pub tag_name: String,
    pub text: String,
    pub id: String,
    pub class_name: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub rect: ElementRect,
}

/// What the host should draw around the capture target. Produced by the
/// overlay plan builder; the host renders it and must flush layout before
/// acknowledging so the overlay is present in the very next capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPlan {
    pub highlight: ElementRect,
    pub label: String,
    pub label_position: ClickPoint,
}

/// Result of an overlay verification probe. `visible` reflects computed
/// style, not DOM presence; a present-but-invisible overlay triggers the
/// retry path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayProbe {
    pub present: bool,
    pub visible: bool,
    pub element_count: u32,
}

/// The surface the hosting browser provides to the coordinator: tab queries,
/// viewport capture, artifact downloads, notifications and the overlay
/// sub-protocol. All methods take `&self`; implementations are shared behind
/// `Arc<dyn Host>`.
#[async_trait]
pub trait Host: Send + Sync {
    /// The currently focused tab, if any.
    async fn active_tab(&self) -> Result<Option<TabRef>, HostError>;

    /// Fresh metadata for a tab, including its window id.
    async fn tab_info(&self, tab_id: u32) -> Result<TabRef, HostError>;

    /// Captures the visible viewport of a window as encoded PNG bytes.
    async fn capture_visible(&self, window_id: u32) -> Result<Vec<u8>, HostError>;

    /// Persists an artifact through the host's download surface.
    async fn download(&self, request: DownloadRequest) -> Result<(), HostError>;

    /// Shows a user-facing notification.
    async fn notify(&self, title: &str, message: &str) -> Result<(), HostError> {
        let _ = (title, message);
        Err(HostError::NotSupported("notify"))
    }

    /// Reflects recording state on the host's action icon.
    async fn set_icon(&self, recording: bool) -> Result<(), HostError> {
        let _ = recording;
        Ok(())
    }

    /// Current viewport and element geometry of a tab.
    async fn page_snapshot(&self, tab_id: u32) -> Result<PageSnapshot, HostError>;

    /// Renders the capture overlay in a tab. Must force a style/layout flush
    /// before returning.
    async fn show_overlay(&self, tab_id: u32, plan: &OverlayPlan) -> Result<(), HostError>;

    /// Verifies the overlay is present and actually visible.
    async fn probe_overlay(&self, tab_id: u32) -> Result<OverlayProbe, HostError> {
        let _ = tab_id;
        Err(HostError::NotSupported("probe_overlay"))
    }

    /// Removes the overlay from a tab if present.
    async fn clear_overlay(&self, tab_id: u32) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_failures_classify_first() {
        assert!(matches!(
            classify_host_error("The 'activeTab' permission is not in effect"),
            HostError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_host_error("Permission denied for capture"),
            HostError::PermissionDenied(_)
        ));
    }

    #[test]
    fn internal_pages_classify_before_windows() {
        assert!(matches!(
            classify_host_error("Pages with chrome:// URLs cannot be captured"),
            HostError::InternalPage(_)
        ));
    }

    #[test]
    fn window_and_tab_failures_split() {
        assert!(matches!(
            classify_host_error("No window with id: 42"),
            HostError::WindowUnavailable(_)
        ));
        assert!(matches!(
            classify_host_error("No tab with id: 7"),
            HostError::TabNotVisible(_)
        ));
    }

    #[test]
    fn unknown_text_falls_through() {
        assert!(matches!(
            classify_host_error("something odd happened"),
            HostError::Other(_)
        ));
    }
}
