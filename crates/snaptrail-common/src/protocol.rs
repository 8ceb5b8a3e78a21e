use serde::{Deserialize, Serialize};

use crate::element::{ClickPoint, ElementDescriptor};

/// Requests accepted by the session coordinator. Page observers and control
/// surfaces (popup, REPL) speak the same tagged wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetState,
    ToggleSession,
    SaveSession,
    ToggleDebugMode,
    ForceStopAllSessions,
    CaptureScreenshot(CaptureRequest),
    InteractionCapture(InteractionRequest),
}

impl Request {
    /// Wire tag of the request, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetState => "getState",
            Request::ToggleSession => "toggleSession",
            Request::SaveSession => "saveSession",
            Request::ToggleDebugMode => "toggleDebugMode",
            Request::ForceStopAllSessions => "forceStopAllSessions",
            Request::CaptureScreenshot(_) => "captureScreenshot",
            Request::InteractionCapture(_) => "interactionCapture",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureRequest {
    pub options: CaptureOptions,
}

/// Options threaded through the capture pipeline. Everything defaults so a
/// bare `{"action":"captureScreenshot"}` is a valid manual capture.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_info: Option<ElementDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_position: Option<ClickPoint>,
    pub is_interaction: bool,
    pub is_test_capture: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRequest {
    pub element_type: String,
    pub element_info: ElementDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<ClickPoint>,
}

/// Replies from the coordinator. `State` answers `getState`; everything else
/// gets an `Ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    State(StateReply),
    Ack(Ack),
}

impl Reply {
    pub fn is_success(&self) -> bool {
        match self {
            Reply::State(_) => true,
            Reply::Ack(ack) => ack.success,
        }
    }

    pub fn session_active(&self) -> Option<bool> {
        match self {
            Reply::State(state) => Some(state.session_active),
            Reply::Ack(ack) => ack.session_active,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReply {
    pub session_active: bool,
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_session_active(mut self, active: bool) -> Self {
        self.session_active = Some(active);
        self
    }

    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = Some(debug);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// State pushes from the coordinator to registered pages. Each push is acked
/// by the page; delivery is raced against a per-page timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PagePush {
    UpdateSessionState(StatePush),
    ForceEndSession(ForceEndPush),
}

impl PagePush {
    pub fn state(session_active: bool) -> Self {
        PagePush::UpdateSessionState(StatePush { session_active })
    }

    pub fn force_end(timestamp_ms: i64) -> Self {
        PagePush::ForceEndSession(ForceEndPush {
            session_active: false,
            timestamp: timestamp_ms,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatePush {
    pub session_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForceEndPush {
    pub session_active: bool,
    /// Epoch milliseconds at which the force-end was issued.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PushAck {
    pub success: bool,
}
