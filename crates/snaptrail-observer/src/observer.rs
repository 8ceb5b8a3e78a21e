//! Per-page observer: decides which interactions become capture requests and
//! keeps the page's affordances in sync with the coordinator's session state.
//! Exactly one observer runs per page; a re-injection replaces the previous
//! instance via [`PageObserver::shutdown`], never runs alongside it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use snaptrail_common::protocol::{
    CaptureOptions, CaptureRequest, InteractionRequest, PagePush, PushAck, Reply, Request,
};

use crate::events::DomEvent;
use crate::filter;
use crate::link::{CoordinatorLink, LinkError};
use crate::surface::{PageSurface, Tone};

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Leading-edge cool-down shared by clicks and submits; interactions
    /// inside the window are dropped, not queued.
    pub cooldown_ms: u64,
    /// Delay before re-querying the coordinator after a state change.
    pub reconcile_delay_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 500,
            reconcile_delay_ms: 500,
        }
    }
}

impl ObserverConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }
}

#[derive(Default)]
struct ObserverState {
    session_active: bool,
    /// Interaction intake and the capture button are armed as a pair.
    intake_armed: bool,
    last_interaction: Option<Instant>,
}

#[derive(Clone)]
pub struct PageObserver {
    link: Arc<dyn CoordinatorLink>,
    surface: Arc<dyn PageSurface>,
    config: ObserverConfig,
    state: Arc<Mutex<ObserverState>>,
}

impl PageObserver {
    pub fn new(
        link: Arc<dyn CoordinatorLink>,
        surface: Arc<dyn PageSurface>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            link,
            surface,
            config,
            state: Arc::new(Mutex::new(ObserverState::default())),
        }
    }

    /// Adopts the coordinator's state on page load. No toast: joining an
    /// already-running session is not a state change.
    pub async fn init(&self) -> Result<(), LinkError> {
        let reply = self.link.ask(Request::GetState).await?;
        let Reply::State(state) = reply else {
            return Err(LinkError::Other("unexpected reply to state query".to_string()));
        };
        debug!(session_active = state.session_active, "observer initialized");
        if state.session_active {
            self.apply_state(true, false).await;
        }
        Ok(())
    }

    pub async fn session_active(&self) -> bool {
        self.state.lock().await.session_active
    }

    pub async fn intake_armed(&self) -> bool {
        self.state.lock().await.intake_armed
    }

    /// Handles a push from the coordinator and produces its ack.
    pub async fn handle_push(&self, push: PagePush) -> PushAck {
        match push {
            PagePush::UpdateSessionState(state) => {
                self.apply_state(state.session_active, true).await;
                self.schedule_reconcile();
            }
            PagePush::ForceEndSession(_) => {
                self.force_end().await;
            }
        }
        PushAck { success: true }
    }

    async fn apply_state(&self, active: bool, announce: bool) {
        {
            let mut state = self.state.lock().await;
            state.session_active = active;
            state.intake_armed = active;
        }
        if active {
            self.surface.mount_capture_button().await;
            if announce {
                self.surface.toast("Recording session started", Tone::Success).await;
            }
        } else {
            self.surface.remove_capture_button().await;
            if announce {
                self.surface.toast("Recording session stopped", Tone::Info).await;
            }
        }
    }

    /// Unconditional teardown. Runs the removals even when nothing appears to
    /// be armed; the whole point is recovering from drift.
    pub async fn force_end(&self) {
        info!("force ending recording on this page");
        {
            let mut state = self.state.lock().await;
            state.session_active = false;
            state.intake_armed = false;
        }
        self.surface.remove_capture_button().await;
        self.surface.toast("Recording session force ended", Tone::Info).await;
    }

    /// Teardown for page unload or instance replacement.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.session_active = false;
            state.intake_armed = false;
        }
        self.surface.remove_capture_button().await;
    }

    fn schedule_reconcile(&self) {
        let observer = self.clone();
        let delay = self.config.reconcile_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            observer.reconcile().await;
        });
    }

    /// Re-queries the coordinator and silently adopts its state on drift.
    pub async fn reconcile(&self) {
        let reply = match self.link.ask(Request::GetState).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!(error = %err, "reconcile query failed");
                return;
            }
        };
        let Some(active) = reply.session_active() else {
            return;
        };
        let local = self.state.lock().await.session_active;
        if local != active {
            warn!(
                local,
                coordinator = active,
                "session state drift detected, adopting coordinator state"
            );
            self.apply_state(active, false).await;
        }
    }

    /// Intake for raw page interactions: gate on local state, rate-limit,
    /// filter, double-check with the coordinator, then request the capture.
    /// Never returns an error; a page interaction has nobody to report to.
    pub async fn on_dom_event(&self, event: DomEvent) {
        {
            let mut state = self.state.lock().await;
            if !state.session_active || !state.intake_armed {
                debug!("interaction dropped, recording inactive");
                return;
            }
            if let Some(last) = state.last_interaction {
                if last.elapsed() < self.config.cooldown() {
                    debug!("interaction dropped by cool-down");
                    return;
                }
            }
            state.last_interaction = Some(Instant::now());
        }

        let (mut element, point) = match event {
            DomEvent::Click(click) => {
                if !filter::is_interactive(&click.element) {
                    debug!(tag = %click.element.tag_name, "click target not interactive, ignored");
                    return;
                }
                (click.element, click.point)
            }
            DomEvent::Submit(submit) => {
                let mut form = submit.form;
                form.element_type = "form-submit".to_string();
                (form, None)
            }
        };

        // The local flag can be stale; confirm with the coordinator before
        // requesting a capture for a session that already ended.
        match self.link.ask(Request::GetState).await {
            Ok(reply) => {
                if reply.session_active() == Some(false) {
                    debug!("coordinator reports inactive, interaction dropped");
                    self.state.lock().await.session_active = false;
                    return;
                }
            }
            Err(err) => {
                debug!(error = %err, "state double-check failed, interaction dropped");
                return;
            }
        }

        if let Some(rect) = element.position {
            self.surface.flash(rect).await;
        }

        let element_type = element.kind();
        let click_position = element.position.map(|rect| rect.center()).or(point);
        element.is_interactive = true;

        let request = Request::InteractionCapture(InteractionRequest {
            element_type,
            element_info: element,
            click_position,
        });
        match self.link.ask(request).await {
            Ok(reply) if reply.is_success() => debug!("interaction capture acknowledged"),
            Ok(Reply::Ack(ack)) => {
                let error = ack.error.unwrap_or_default();
                debug!(%error, "interaction capture rejected");
                if error == "Session not active" || error == "Session ended" {
                    self.state.lock().await.session_active = false;
                }
            }
            Ok(Reply::State(_)) => {}
            Err(err) => debug!(error = %err, "interaction capture failed to send"),
        }
    }

    /// Capture triggered from the floating button.
    pub async fn capture_manual(&self) {
        let request = Request::CaptureScreenshot(CaptureRequest {
            options: CaptureOptions {
                reason: Some("Manual Capture".to_string()),
                ..CaptureOptions::default()
            },
        });
        match self.link.ask(request).await {
            Ok(reply) if reply.is_success() => {
                self.surface.toast("Screenshot captured", Tone::Success).await;
            }
            Ok(_) => {
                self.surface.toast("Screenshot failed", Tone::Error).await;
            }
            Err(err) => {
                debug!(error = %err, "manual capture failed");
                self.surface.toast("Screenshot failed", Tone::Error).await;
            }
        }
    }
}
