//! Session data model: the in-memory record of one recording session and the
//! normalized export document written when it ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::element::{ClickPoint, ElementDescriptor};
use crate::naming;

/// One recording session. At most one is active extension-wide; the
/// coordinator owns it and appends to it as captures complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub domain: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_screenshots: u32,
    pub navigation_count: u32,
    pub screenshots: Vec<ScreenshotRecord>,
    pub pages: Vec<PageVisit>,
}

impl Session {
    pub fn begin(start_time: DateTime<Utc>, domain: impl Into<String>) -> Self {
        Self {
            session_id: naming::session_id_for(start_time),
            domain: domain.into(),
            start_time,
            end_time: None,
            total_screenshots: 0,
            navigation_count: 0,
            screenshots: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// A capture counts as a navigation when its URL differs from the most
    /// recently visited page (first captures always do).
    pub fn is_new_page(&self, url: &str) -> bool {
        match self.pages.last() {
            Some(last) => last.url != url,
            None => true,
        }
    }

    /// Records a page visit, bumping the navigation ordinal. Returns the
    /// ordinal assigned to this visit.
    pub fn note_navigation(
        &mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> u32 {
        self.navigation_count += 1;
        self.pages.push(PageVisit {
            url: url.into(),
            title: title.into(),
            timestamp,
            sequence: self.navigation_count,
        });
        self.navigation_count
    }

    /// Appends a capture record and links the previous record's `next`
    /// pointer to it.
    pub fn push_screenshot(&mut self, record: ScreenshotRecord) {
        if let Some(previous) = self.screenshots.last_mut() {
            previous.proceeding_step = Some(record.sequence);
        }
        self.screenshots.push(record);
        self.total_screenshots = self.screenshots.len() as u32;
    }

    pub fn summary_at(&self, end: DateTime<Utc>) -> SessionSummary {
        let duration = (end - self.start_time).num_seconds().max(0);
        let mut urls: Vec<&str> = self.screenshots.iter().map(|s| s.url.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        SessionSummary {
            total_actions: self.screenshots.len() as u32,
            duration,
            unique_pages: urls.len() as u32,
        }
    }
}

/// One annotated capture inside a session. Field names are fixed by the wire
/// format, including the historical `proceedingStep` spelling for the next
/// pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    /// 1-based position in the session, contiguous across pages.
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    /// Full artifact path the image was persisted under.
    pub filename: String,
    pub url: String,
    pub page_title: String,
    pub element_info: Option<ElementDescriptor>,
    pub click_position: Option<ClickPoint>,
    pub is_navigation: bool,
    /// Navigation ordinal, set only on records that landed on a new page.
    pub navigation_count: Option<u32>,
    pub preceding_step: Option<u32>,
    pub proceeding_step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    /// Navigation ordinal of this visit within the session.
    pub sequence: u32,
}

/// Derived statistics embedded in the export document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_actions: u32,
    /// Whole seconds from session start to end.
    pub duration: i64,
    pub unique_pages: u32,
}

/// The export document written at session end. Every field is concrete so
/// serialization cannot fail on a half-built session: the end time falls back
/// to the provided timestamp, an empty domain becomes `unknown`, an empty id
/// is re-derived from the start time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub session_id: String,
    pub domain: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_screenshots: u32,
    pub navigation_count: u32,
    pub screenshots: Vec<ScreenshotRecord>,
    pub pages: Vec<PageVisit>,
    pub summary: SessionSummary,
}

impl SessionExport {
    pub fn from_session(session: &Session, fallback_end: DateTime<Utc>) -> Self {
        let end_time = session.end_time.unwrap_or(fallback_end);
        let session_id = if session.session_id.is_empty() {
            naming::session_id_for(session.start_time)
        } else {
            session.session_id.clone()
        };
        let domain = if session.domain.is_empty() {
            naming::UNKNOWN_DOMAIN.to_string()
        } else {
            session.domain.clone()
        };
        Self {
            session_id,
            domain,
            start_time: session.start_time,
            end_time,
            total_screenshots: session.screenshots.len() as u32,
            navigation_count: session.navigation_count,
            screenshots: session.screenshots.clone(),
            pages: session.pages.clone(),
            summary: session.summary_at(end_time),
        }
    }
}
