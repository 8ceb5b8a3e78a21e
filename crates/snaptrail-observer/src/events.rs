use serde::{Deserialize, Serialize};

use snaptrail_common::element::{ClickPoint, ElementDescriptor};

/// Raw page interactions as the page context reports them, before filtering
/// and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DomEvent {
    Click(ClickEvent),
    Submit(SubmitEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub element: ElementDescriptor,
    /// Raw event coordinates; the element-rect center is preferred when the
    /// descriptor carries a position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<ClickPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvent {
    pub form: ElementDescriptor,
}
