//! The session coordinator: owns the one active session, drives the capture
//! pipeline, the idle timer and state fan-out to pages. All requests funnel
//! through [`Coordinator::handle_from`]; errors are converted to failed acks
//! there and never escape the message boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use snaptrail_common::naming;
use snaptrail_common::protocol::{Ack, CaptureOptions, PagePush, Reply, Request, StateReply};
use snaptrail_common::session::{ScreenshotRecord, Session, SessionExport};

use crate::broadcast::PageRegistry;
use crate::config::RecorderConfig;
use crate::host::{DownloadRequest, Host, HostError, TabRef};
use crate::overlay;
use crate::state::RuntimeState;
use crate::storage::{Storage, StoreError};

/// Internal failures behind the message boundary.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("host failure: {0}")]
    Host(#[from] HostError),
}

/// Capture failures surfaced to callers, one variant per distinguishable
/// cause.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no usable tab: {0}")]
    TabInvalid(String),

    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal pages cannot be captured: {0}")]
    InternalPage(String),

    #[error("capture produced no image data")]
    EmptyCapture,

    #[error("artifact persistence failed: {0}")]
    Persistence(String),

    #[error("capture failed: {0}")]
    Host(String),
}

impl From<HostError> for CaptureError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::PermissionDenied(m) => CaptureError::PermissionDenied(m),
            HostError::InternalPage(m) => CaptureError::InternalPage(m),
            HostError::TabNotVisible(m) | HostError::WindowUnavailable(m) => {
                CaptureError::TabInvalid(m)
            }
            other => CaptureError::Host(other.to_string()),
        }
    }
}

/// How a capture call ended. An abort is a quiet outcome, not an error: the
/// session went away while the pipeline ran and nothing was written.
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured { path: String },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No session was active when the capture started.
    SessionInactive,
    /// The session ended between the viewport capture and the write.
    SessionEnded,
}

#[derive(Default)]
struct IdleTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Where a capture landed: its artifact path plus the session bookkeeping
/// that accompanied it.
struct Placement {
    path: String,
    sequence: Option<u32>,
    updated_session: Option<Session>,
    auto_started: bool,
}

#[derive(Clone)]
pub struct Coordinator {
    host: Arc<dyn Host>,
    storage: Storage,
    pages: PageRegistry,
    config: RecorderConfig,
    state: Arc<Mutex<RuntimeState>>,
    idle: Arc<Mutex<IdleTimer>>,
}

impl Coordinator {
    pub fn new(host: Arc<dyn Host>, storage: Storage, config: RecorderConfig) -> Self {
        Self {
            host,
            storage,
            pages: PageRegistry::new(),
            config,
            state: Arc::new(Mutex::new(RuntimeState::new())),
            idle: Arc::new(Mutex::new(IdleTimer::default())),
        }
    }

    /// Registry the bridge registers page peers in.
    pub fn pages(&self) -> PageRegistry {
        self.pages.clone()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub async fn status(&self) -> StateReply {
        let state = self.state.lock().await;
        StateReply {
            session_active: state.session_active,
            debug_mode: state.debug_mode,
        }
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    /// Adopts persisted state after a restart. A session that was active when
    /// the previous coordinator died resumes, idle timer re-armed.
    pub async fn hydrate(&self) -> Result<(), CoordinatorError> {
        let persisted = self.storage.snapshot().await?;
        let resume = {
            let mut state = self.state.lock().await;
            state.hydrate(persisted);
            state.recording()
        };
        if resume {
            info!("resuming session that was active before restart");
            self.arm_idle_timer().await;
        }
        Ok(())
    }

    pub async fn handle(&self, request: Request) -> Reply {
        self.handle_from(request, None).await
    }

    /// The message boundary. `sender` is the requesting page's tab when the
    /// request came from a page context.
    pub async fn handle_from(&self, request: Request, sender: Option<TabRef>) -> Reply {
        debug!(action = request.name(), "handling request");
        match request {
            Request::GetState => Reply::State(self.status().await),
            Request::ToggleSession => self.ack_or_error(self.toggle_session().await),
            Request::SaveSession => self.ack_or_error(self.save_session_now().await),
            Request::ToggleDebugMode => self.ack_or_error(self.toggle_debug().await),
            Request::ForceStopAllSessions => self.ack_or_error(self.force_stop_all().await),
            Request::CaptureScreenshot(req) => self.capture_to_reply(req.options, sender).await,
            Request::InteractionCapture(req) => {
                if !self.state.lock().await.session_active {
                    return Reply::Ack(Ack::error("Session not active"));
                }
                let mut element = req.element_info;
                element.is_interactive = true;
                let options = CaptureOptions {
                    reason: Some(format!("Interaction: {}", req.element_type)),
                    element_info: Some(element),
                    click_position: req.click_position,
                    is_interaction: true,
                    is_test_capture: false,
                };
                self.capture_to_reply(options, sender).await
            }
        }
    }

    fn ack_or_error(&self, result: Result<Ack, CoordinatorError>) -> Reply {
        match result {
            Ok(ack) => Reply::Ack(ack),
            Err(err) => {
                error!(error = %err, "request failed");
                Reply::Ack(Ack::error(err.to_string()))
            }
        }
    }

    async fn capture_to_reply(&self, options: CaptureOptions, sender: Option<TabRef>) -> Reply {
        match self.capture_screenshot(options, sender).await {
            Ok(CaptureOutcome::Captured { path }) => Reply::Ack(Ack::ok().with_filename(path)),
            Ok(CaptureOutcome::Aborted(reason)) => {
                info!(?reason, "capture aborted");
                Reply::Ack(Ack::error("Session ended"))
            }
            Err(err) => {
                error!(error = %err, "capture failed");
                self.notify_user("Screenshot Failed", &err.to_string()).await;
                Reply::Ack(Ack::error(err.to_string()))
            }
        }
    }

    /// Flips the session flag and runs the matching lifecycle, then fans the
    /// new state out to every page. Individual page failures are counted and
    /// swallowed.
    pub async fn toggle_session(&self) -> Result<Ack, CoordinatorError> {
        let now_active = {
            let mut state = self.state.lock().await;
            state.session_active = !state.session_active;
            state.session_active
        };
        self.storage.set_session_active(now_active).await?;

        if now_active {
            self.start_session().await?;
        } else {
            self.end_session().await?;
        }

        self.pages
            .broadcast(PagePush::state(now_active), self.config.state_push_timeout())
            .await;
        // The off branch resets the icon inside end_session.
        if now_active {
            self.update_icon(true).await;
        }
        Ok(Ack::ok().with_session_active(now_active))
    }

    async fn start_session(&self) -> Result<(), CoordinatorError> {
        let now = Utc::now();
        let tab = match self.host.active_tab().await {
            Ok(tab) => tab,
            Err(err) => {
                warn!(error = %err, "active tab unavailable at session start");
                None
            }
        };
        let domain = tab
            .as_ref()
            .map(|t| naming::domain_for(&t.url))
            .unwrap_or_else(|| naming::UNKNOWN_DOMAIN.to_string());
        let session = Session::begin(now, domain.as_str());

        {
            let mut state = self.state.lock().await;
            state.session = Some(session.clone());
            state.sequence = 0;
            state.navigation_count = 0;
        }
        self.storage.store_session(&session).await?;
        self.storage.set_counters(0, 0).await?;
        self.arm_idle_timer().await;

        info!(session = %session.session_id, domain = %domain, "session started");
        self.debug_log("Session started", Some(json!({ "domain": domain }))).await;
        self.notify_user(
            "Recording Started",
            &format!("Recording session started for {}", domain),
        )
        .await;
        Ok(())
    }

    /// Ends the current session: export first, then a cleanup block that runs
    /// no matter how the export went. Callers relying on state being reset
    /// after this returns are safe even on export failure.
    pub async fn end_session(&self) -> Result<(), CoordinatorError> {
        let finish = self.finish_session().await;
        if let Err(err) = &finish {
            error!(error = %err, "session finalization failed");
        }

        {
            let mut state = self.state.lock().await;
            state.reset_session();
        }
        self.clear_idle_timer().await;
        if let Err(err) = self.storage.clear_session_state().await {
            warn!(error = %err, "failed to clear persisted session state");
        }
        self.pages
            .broadcast(
                PagePush::force_end(Utc::now().timestamp_millis()),
                self.config.force_end_timeout(),
            )
            .await;
        self.update_icon(false).await;
        finish
    }

    async fn finish_session(&self) -> Result<(), CoordinatorError> {
        let session = {
            let mut state = self.state.lock().await;
            match state.session.as_mut() {
                Some(session) => {
                    session.end_time = Some(Utc::now());
                    session.clone()
                }
                None => {
                    info!("no session to finalize");
                    return Ok(());
                }
            }
        };

        match self.write_export(&session).await {
            Ok(path) => {
                info!(path = %path, screenshots = session.total_screenshots, "session exported");
                self.debug_log("Session exported", Some(json!({ "path": path }))).await;
                self.notify_user("Session Saved", &format!("Session data saved to {}", path))
                    .await;
                Ok(())
            }
            Err(err) => {
                // Last resort: the payload goes to the log so nothing is
                // silently lost.
                if let Ok(payload) =
                    serde_json::to_string(&SessionExport::from_session(&session, Utc::now()))
                {
                    error!(payload = %payload, "unexported session payload");
                }
                self.notify_user(
                    "Session Export Failed",
                    "Session data could not be written; see logs",
                )
                .await;
                Err(err)
            }
        }
    }

    async fn write_export(&self, session: &Session) -> Result<String, CoordinatorError> {
        let export = SessionExport::from_session(session, Utc::now());
        let body = serde_json::to_string_pretty(&export)?;
        let path = naming::artifact_path(
            &self.config.root_folder,
            Some(&export.domain),
            self.config.test_capture_mode,
            &naming::session_filename(&export.session_id),
        );
        self.host
            .download(DownloadRequest::json(path.clone(), body))
            .await?;
        Ok(path)
    }

    /// Mid-session export without ending the session.
    pub async fn save_session_now(&self) -> Result<Ack, CoordinatorError> {
        let session = self.state.lock().await.session.clone();
        match session {
            Some(ref session) if !session.screenshots.is_empty() => {
                let path = self.write_export(session).await?;
                info!(path = %path, "session saved on request");
                Ok(Ack::ok().with_filename(path).with_message("Session saved"))
            }
            _ => Ok(Ack::error("No active session with screenshots to save")),
        }
    }

    pub async fn toggle_debug(&self) -> Result<Ack, CoordinatorError> {
        let debug_mode = {
            let mut state = self.state.lock().await;
            state.debug_mode = !state.debug_mode;
            state.debug_mode
        };
        self.storage.set_debug_mode(debug_mode).await?;
        info!(debug_mode, "debug mode toggled");
        self.debug_log(
            if debug_mode {
                "Debug mode enabled"
            } else {
                "Debug mode disabled"
            },
            None,
        )
        .await;
        Ok(Ack::ok().with_debug_mode(debug_mode))
    }

    /// Unconditional reset of memory, storage and every page. Safe to call
    /// repeatedly and in any state.
    pub async fn force_stop_all(&self) -> Result<Ack, CoordinatorError> {
        warn!("force stopping all sessions");
        {
            let mut state = self.state.lock().await;
            state.reset_session();
        }
        self.clear_idle_timer().await;
        self.storage.clear_session_state().await?;
        self.pages
            .broadcast(
                PagePush::force_end(Utc::now().timestamp_millis()),
                self.config.force_end_timeout(),
            )
            .await;
        self.update_icon(false).await;
        self.notify_user(
            "Session Force Stopped",
            "All recording sessions have been forcibly stopped",
        )
        .await;
        Ok(Ack::ok().with_session_active(false))
    }

    /// The capture pipeline. Slow steps run outside the state lock, so a
    /// session end can land between them; the pipeline re-checks and aborts
    /// rather than write into a dead session.
    pub async fn capture_screenshot(
        &self,
        options: CaptureOptions,
        sender: Option<TabRef>,
    ) -> Result<CaptureOutcome, CaptureError> {
        if !self.state.lock().await.session_active {
            return Ok(CaptureOutcome::Aborted(AbortReason::SessionInactive));
        }

        let tab = self.resolve_tab(sender).await?;
        if naming::is_internal_url(&tab.url) {
            return Err(CaptureError::InternalPage(tab.url.clone()));
        }
        let window_id = tab
            .window_id
            .ok_or_else(|| CaptureError::TabInvalid(format!("window unresolved for tab {}", tab.id)))?;

        let mut overlay_shown = false;
        if options.is_interaction {
            if let Some(element) = options.element_info.as_ref() {
                match overlay::ensure_visible(
                    self.host.as_ref(),
                    &self.config,
                    tab.id,
                    &tab.url,
                    element,
                    options.click_position,
                )
                .await
                {
                    Ok(probe) => overlay_shown = probe.present,
                    Err(err) => {
                        warn!(error = %err, "overlay injection failed, capturing without it")
                    }
                }
            }
        }

        let captured = self.host.capture_visible(window_id).await;
        // The overlay comes down after its linger either way; a session end
        // below must not leak it.
        if overlay_shown {
            overlay::schedule_removal(
                self.host.clone(),
                tab.id,
                tab.url.clone(),
                self.config.overlay_linger(),
            );
        }
        let image = captured?;
        if image.is_empty() {
            return Err(CaptureError::EmptyCapture);
        }

        if !self.state.lock().await.session_active {
            info!("session ended during capture, discarding image");
            return Ok(CaptureOutcome::Aborted(AbortReason::SessionEnded));
        }

        let now = Utc::now();
        let placement = {
            let mut state = self.state.lock().await;
            self.place_capture(&mut state, &options, &tab, now)
        };
        if placement.auto_started {
            self.debug_log(
                "Auto-started session for interaction capture",
                Some(json!({ "url": tab.url })),
            )
            .await;
        }

        self.host
            .download(DownloadRequest::png(placement.path.clone(), image))
            .await
            .map_err(|err| CaptureError::Persistence(err.to_string()))?;

        if let Some(session) = &placement.updated_session {
            if let Err(err) = self.storage.store_session(session).await {
                warn!(error = %err, "failed to persist session after capture");
            }
            if let Err(err) = self
                .storage
                .set_counters(placement.sequence.unwrap_or(0), session.navigation_count)
                .await
            {
                warn!(error = %err, "failed to persist counters after capture");
            }
            self.arm_idle_timer().await;
        }

        self.debug_log(
            "Screenshot captured",
            Some(json!({ "path": placement.path, "sequence": placement.sequence })),
        )
        .await;

        if self.state.lock().await.session_active {
            let folder = placement
                .path
                .rsplit_once('/')
                .map(|(dir, _)| dir.to_string())
                .unwrap_or_else(|| self.config.root_folder.clone());
            self.notify_user("Screenshot Captured", &format!("Saved to {}/", folder))
                .await;
        }

        Ok(CaptureOutcome::Captured {
            path: placement.path,
        })
    }

    /// Session bookkeeping for one capture, executed inside the state lock.
    /// Three branches: append to the live session, auto-start one for an
    /// interaction that arrived in the flag-only state after a restart, or
    /// fall through to a flat standalone artifact.
    fn place_capture(
        &self,
        state: &mut RuntimeState,
        options: &CaptureOptions,
        tab: &TabRef,
        now: DateTime<Utc>,
    ) -> Placement {
        let mut auto_started = false;
        if state.session.is_none() && options.is_interaction {
            let domain = naming::domain_for(&tab.url);
            info!(domain = %domain, "auto-starting session for interaction capture");
            state.session = Some(Session::begin(now, domain.as_str()));
            state.sequence = 0;
            state.navigation_count = 0;
            auto_started = true;
        }

        let mut session = match state.session.take() {
            Some(session) => session,
            None => {
                let filename = naming::standalone_filename(now, options.reason.as_deref());
                let path = naming::artifact_path(
                    &self.config.root_folder,
                    None,
                    options.is_test_capture || self.config.test_capture_mode,
                    &filename,
                );
                return Placement {
                    path,
                    sequence: None,
                    updated_session: None,
                    auto_started: false,
                };
            }
        };

        state.sequence += 1;
        let sequence = state.sequence;
        let is_navigation = session.is_new_page(&tab.url);
        let navigation_ordinal = if is_navigation {
            let ordinal = session.note_navigation(tab.url.as_str(), tab.title.as_str(), now);
            state.navigation_count = session.navigation_count;
            Some(ordinal)
        } else {
            None
        };

        let element_text = options
            .element_info
            .as_ref()
            .map(|element| element.text.as_str())
            .filter(|text| !text.is_empty());
        let filename = naming::capture_filename(sequence, now, element_text);
        let domain = session.domain.clone();
        let path = naming::artifact_path(
            &self.config.root_folder,
            Some(&domain),
            options.is_test_capture || self.config.test_capture_mode,
            &filename,
        );

        session.push_screenshot(ScreenshotRecord {
            sequence,
            timestamp: now,
            filename: path.clone(),
            url: tab.url.clone(),
            page_title: tab.title.clone(),
            element_info: options.element_info.clone(),
            click_position: options.click_position,
            is_navigation,
            navigation_count: navigation_ordinal,
            preceding_step: (sequence > 1).then(|| sequence - 1),
            proceeding_step: None,
        });

        let snapshot = session.clone();
        state.session = Some(session);
        Placement {
            path,
            sequence: Some(sequence),
            updated_session: Some(snapshot),
            auto_started,
        }
    }

    async fn resolve_tab(&self, sender: Option<TabRef>) -> Result<TabRef, CaptureError> {
        let candidate = match sender {
            Some(tab) => tab,
            None => self
                .host
                .active_tab()
                .await?
                .ok_or_else(|| CaptureError::TabInvalid("no active tab".to_string()))?,
        };
        if candidate.window_id.is_some() {
            return Ok(candidate);
        }
        // Window id missing from the sender context; ask for fresh metadata.
        let refreshed = self.host.tab_info(candidate.id).await?;
        if refreshed.window_id.is_none() {
            return Err(CaptureError::TabInvalid(format!(
                "window unresolved for tab {}",
                candidate.id
            )));
        }
        Ok(refreshed)
    }

    /// (Re)arms the idle timer. The previous timer task is aborted and a
    /// generation bump invalidates any fire already in flight.
    async fn arm_idle_timer(&self) {
        let mut idle = self.idle.lock().await;
        if let Some(handle) = idle.handle.take() {
            handle.abort();
        }
        idle.generation += 1;
        let generation = idle.generation;
        let timeout = self.config.idle_timeout();
        let coordinator = self.clone();
        idle.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator.idle_fired(generation).await;
        }));
    }

    async fn clear_idle_timer(&self) {
        let mut idle = self.idle.lock().await;
        if let Some(handle) = idle.handle.take() {
            handle.abort();
        }
        idle.generation += 1;
    }

    async fn idle_fired(&self, generation: u64) {
        {
            let mut idle = self.idle.lock().await;
            if idle.generation != generation {
                return;
            }
            // This very task; consumed so the cleanup below cannot abort the
            // end-session work it is part of.
            idle.handle = None;
        }
        if !self.state.lock().await.recording() {
            return;
        }

        info!("session idle timeout reached, auto-ending");
        let minutes = self.config.idle_timeout_ms / 60_000;
        self.notify_user(
            "Session Auto-Ended",
            &format!(
                "Recording session ended after {} minutes of inactivity",
                minutes.max(1)
            ),
        )
        .await;

        {
            let mut state = self.state.lock().await;
            state.session_active = false;
        }
        if let Err(err) = self.storage.set_session_active(false).await {
            warn!(error = %err, "failed to persist auto-end flag");
        }
        if let Err(err) = self.end_session().await {
            error!(error = %err, "idle auto-end failed");
        }
    }

    async fn update_icon(&self, recording: bool) {
        if let Err(err) = self.host.set_icon(recording).await {
            debug!(error = %err, "icon update failed");
        }
    }

    async fn notify_user(&self, title: &str, message: &str) {
        if let Err(err) = self.host.notify(title, message).await {
            debug!(error = %err, title, "notification failed");
        }
    }

    /// Mirrors important events into the persisted debug ring when debug mode
    /// is on. Always traces.
    async fn debug_log(&self, message: impl Into<String>, data: Option<serde_json::Value>) {
        let message = message.into();
        debug!("{}", message);
        let enabled = self.state.lock().await.debug_mode;
        if enabled {
            if let Err(err) = self.storage.append_debug_log(message, data).await {
                warn!(error = %err, "debug log write failed");
            }
        }
    }
}
