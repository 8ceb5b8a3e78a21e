use snaptrail_common::session::Session;

use crate::storage::PersistedState;

/// Mutable coordinator state. Owned behind one mutex; every mutation happens
/// in a short synchronous critical section so slow pipeline steps can observe
/// concurrent changes (a session ended mid-capture) at their next check.
#[derive(Debug, Default)]
pub struct RuntimeState {
    pub session_active: bool,
    pub debug_mode: bool,
    /// Next capture gets `sequence + 1`.
    pub sequence: u32,
    pub navigation_count: u32,
    pub session: Option<Session>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts persisted state after a restart.
    pub fn hydrate(&mut self, persisted: PersistedState) {
        self.session_active = persisted.session_active;
        self.debug_mode = persisted.debug_mode;
        self.session = persisted.session;
        self.sequence = persisted.sequence;
        self.navigation_count = persisted.navigation_count;
    }

    /// Clears everything session-scoped. The debug flag is sticky.
    pub fn reset_session(&mut self) {
        self.session_active = false;
        self.session = None;
        self.sequence = 0;
        self.navigation_count = 0;
    }

    /// True only when the flag is set and a session object exists. The two
    /// can diverge right after a restart; see the auto-session branch.
    pub fn recording(&self) -> bool {
        self.session_active && self.session.is_some()
    }
}
