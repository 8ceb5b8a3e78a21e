use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use snaptrail_common::element::ElementRect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tone {
    Success,
    Info,
    Error,
}

/// In-page affordances the observer drives: the floating capture button,
/// toasts and the local click-feedback flash. Implementations must make the
/// removals idempotent; the observer calls them unconditionally during
/// force-end and shutdown.
#[async_trait]
pub trait PageSurface: Send + Sync {
    async fn mount_capture_button(&self);
    async fn remove_capture_button(&self);
    async fn toast(&self, message: &str, tone: Tone);
    /// Brief visual feedback on the element that was just interacted with.
    async fn flash(&self, rect: ElementRect);
}
