//! Overlay sub-protocol: decide where the capture highlight goes, have the
//! host draw it, verify it is actually visible, and clean it up afterwards.
//!
//! Target lookup is a pure, ordered strategy chain over a page snapshot; the
//! first strategy that yields a rect wins. The final synthetic strategy is
//! best effort: a page that re-rendered since the interaction may get a
//! slightly misplaced highlight, which is acceptable.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use snaptrail_common::element::{ClickPoint, ElementDescriptor, ElementRect};
use snaptrail_common::naming;

use crate::config::RecorderConfig;
use crate::host::{Host, HostError, OverlayPlan, OverlayProbe, PageSnapshot, Viewport};

/// Position-match tolerance in pixels for the origin.
const POSITION_TOLERANCE: i32 = 5;
/// Position-match tolerance in pixels for width/height.
const SIZE_TOLERANCE: i32 = 10;
/// Side length of the synthetic highlight around a bare click point.
const SYNTHETIC_SIZE: i32 = 40;
/// Pixels the highlight extends past the element on every side.
const HIGHLIGHT_MARGIN: i32 = 3;
/// Assumed label width for right-edge clamping.
const LABEL_WIDTH: i32 = 300;

/// Resolves the rect to highlight for an interaction. Strategies in order:
/// reported position, element id, tag/text/class signature, click-point
/// containment, synthetic rect around the click.
pub fn resolve_target(
    snapshot: &PageSnapshot,
    element: &ElementDescriptor,
    click: Option<ClickPoint>,
) -> Option<ElementRect> {
    by_position(snapshot, element)
        .or_else(|| by_id(snapshot, element))
        .or_else(|| by_signature(snapshot, element))
        .or_else(|| click.and_then(|point| by_point(snapshot, point)))
        .or_else(|| click.map(synthetic_rect))
}

fn by_position(snapshot: &PageSnapshot, element: &ElementDescriptor) -> Option<ElementRect> {
    let target = element.position?;
    snapshot
        .elements
        .iter()
        .map(|candidate| candidate.rect)
        .find(|rect| {
            (rect.x - target.x).abs() < POSITION_TOLERANCE
                && (rect.y - target.y).abs() < POSITION_TOLERANCE
                && (rect.width - target.width).abs() < SIZE_TOLERANCE
                && (rect.height - target.height).abs() < SIZE_TOLERANCE
        })
}

fn by_id(snapshot: &PageSnapshot, element: &ElementDescriptor) -> Option<ElementRect> {
    if element.id.is_empty() {
        return None;
    }
    snapshot
        .elements
        .iter()
        .find(|candidate| candidate.id == element.id)
        .map(|candidate| candidate.rect)
}

fn by_signature(snapshot: &PageSnapshot, element: &ElementDescriptor) -> Option<ElementRect> {
    if element.tag_name.is_empty() {
        return None;
    }
    let text_prefix: String = element.text.chars().take(20).collect();
    snapshot
        .elements
        .iter()
        .find(|candidate| {
            if !candidate.tag_name.eq_ignore_ascii_case(&element.tag_name) {
                return false;
            }
            if !text_prefix.is_empty() && !candidate.text.trim().starts_with(&text_prefix) {
                return false;
            }
            if !element.class_name.is_empty() && candidate.class_name != element.class_name {
                return false;
            }
            if !element.element_type.is_empty() && candidate.element_type != element.element_type {
                return false;
            }
            true
        })
        .map(|candidate| candidate.rect)
}

/// Smallest element containing the click, mirroring a hit test at that point.
fn by_point(snapshot: &PageSnapshot, point: ClickPoint) -> Option<ElementRect> {
    snapshot
        .elements
        .iter()
        .map(|candidate| candidate.rect)
        .filter(|rect| rect.contains(point))
        .min_by_key(|rect| rect.area())
}

fn synthetic_rect(click: ClickPoint) -> ElementRect {
    ElementRect::new(
        click.x - SYNTHETIC_SIZE / 2,
        click.y - SYNTHETIC_SIZE / 2,
        SYNTHETIC_SIZE,
        SYNTHETIC_SIZE,
    )
}

/// Builds the drawing instructions for a resolved target: expanded highlight
/// box plus a label kept on-screen.
pub fn build_plan(
    target: ElementRect,
    element: &ElementDescriptor,
    viewport: Viewport,
) -> OverlayPlan {
    let highlight = target.expanded(HIGHLIGHT_MARGIN);

    let mut label = if element.tag_name.is_empty() {
        "ELEMENT".to_string()
    } else {
        element.tag_name.to_uppercase()
    };
    if !element.id.is_empty() {
        label.push('#');
        label.push_str(&element.id);
    }
    let text = element.text.trim();
    if !text.is_empty() {
        let snippet: String = text.chars().take(30).collect();
        let ellipsis = if text.chars().count() > 30 { "..." } else { "" };
        label.push_str(&format!(": \"{}{}\"", snippet, ellipsis));
    } else if !element.aria_label.is_empty() {
        let snippet: String = element.aria_label.chars().take(20).collect();
        label.push_str(&format!(" ({})", snippet));
    }

    // Above the highlight unless that would leave the viewport, then below.
    let mut label_y = target.y - 35;
    if target.y < 40 {
        label_y = target.bottom() + 10;
    }
    let width = viewport.width as i32;
    let label_x = highlight.x.clamp(10, (width - LABEL_WIDTH - 10).max(10));

    OverlayPlan {
        highlight,
        label,
        label_position: ClickPoint::new(label_x, label_y),
    }
}

/// Full pre-capture choreography: resolve, draw, settle, verify, retry once.
/// Callers treat any error as non-fatal; a capture without its overlay is
/// better than no capture.
pub async fn ensure_visible(
    host: &dyn Host,
    config: &RecorderConfig,
    tab_id: u32,
    tab_url: &str,
    element: &ElementDescriptor,
    click: Option<ClickPoint>,
) -> Result<OverlayProbe, HostError> {
    if naming::is_internal_url(tab_url) {
        debug!(url = %tab_url, "internal page, overlay skipped");
        return Ok(OverlayProbe::default());
    }

    let snapshot = host.page_snapshot(tab_id).await?;
    let Some(target) = resolve_target(&snapshot, element, click) else {
        debug!("no overlay target resolvable for interaction");
        return Ok(OverlayProbe::default());
    };
    let plan = build_plan(target, element, snapshot.viewport);

    host.show_overlay(tab_id, &plan).await?;
    tokio::time::sleep(config.overlay_settle()).await;

    let probe = match host.probe_overlay(tab_id).await {
        Ok(probe) => probe,
        Err(HostError::NotSupported(_)) => {
            debug!("host cannot verify overlays, assuming settled");
            return Ok(OverlayProbe {
                present: true,
                visible: true,
                element_count: 0,
            });
        }
        Err(err) => return Err(err),
    };
    if probe.present && probe.visible {
        return Ok(probe);
    }

    warn!(
        present = probe.present,
        visible = probe.visible,
        "overlay not visible after settle, re-injecting"
    );
    host.show_overlay(tab_id, &plan).await?;
    tokio::time::sleep(config.overlay_retry()).await;
    match host.probe_overlay(tab_id).await {
        Ok(second) => {
            if !(second.present && second.visible) {
                warn!("overlay still not visible after retry, capturing anyway");
            }
            Ok(second)
        }
        Err(_) => Ok(probe),
    }
}

/// Schedules overlay removal after the configured linger. Internal pages are
/// a silent no-op; removal failures are logged and dropped.
pub fn schedule_removal(
    host: Arc<dyn Host>,
    tab_id: u32,
    tab_url: String,
    linger: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(linger).await;
        if naming::is_internal_url(&tab_url) {
            return;
        }
        if let Err(err) = host.clear_overlay(tab_id).await {
            debug!(error = %err, "overlay removal failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SnapshotElement;

    fn snapshot(elements: Vec<SnapshotElement>) -> PageSnapshot {
        PageSnapshot {
            viewport: Viewport {
                width: 1280,
                height: 800,
            },
            elements,
        }
    }

    fn snap_el(id: &str, tag: &str, text: &str, rect: ElementRect) -> SnapshotElement {
        SnapshotElement {
            tag_name: tag.to_string(),
            text: text.to_string(),
            id: id.to_string(),
            class_name: String::new(),
            element_type: String::new(),
            rect,
        }
    }

    fn descriptor(tag: &str, id: &str, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            tag_name: tag.to_string(),
            id: id.to_string(),
            text: text.to_string(),
            ..ElementDescriptor::default()
        }
    }

    #[test]
    fn position_match_wins_over_id() {
        let reported = ElementRect::new(100, 200, 80, 30);
        let snap = snapshot(vec![
            snap_el("submit", "BUTTON", "Go", ElementRect::new(400, 400, 80, 30)),
            snap_el("", "BUTTON", "Go", ElementRect::new(102, 198, 84, 33)),
        ]);
        let mut desc = descriptor("BUTTON", "submit", "Go");
        desc.position = Some(reported);

        let resolved = resolve_target(&snap, &desc, None).unwrap();
        assert_eq!(resolved, ElementRect::new(102, 198, 84, 33));
    }

    #[test]
    fn id_match_is_second() {
        let snap = snapshot(vec![snap_el(
            "submit",
            "BUTTON",
            "Go",
            ElementRect::new(400, 400, 80, 30),
        )]);
        let mut desc = descriptor("BUTTON", "submit", "Go");
        desc.position = Some(ElementRect::new(0, 0, 10, 10));

        let resolved = resolve_target(&snap, &desc, None).unwrap();
        assert_eq!(resolved, ElementRect::new(400, 400, 80, 30));
    }

    #[test]
    fn signature_match_requires_text_prefix() {
        let snap = snapshot(vec![
            snap_el("", "A", "Documentation portal", ElementRect::new(10, 10, 120, 20)),
            snap_el("", "A", "Pricing", ElementRect::new(10, 50, 120, 20)),
        ]);
        let desc = descriptor("a", "", "Pricing");
        let resolved = resolve_target(&snap, &desc, None).unwrap();
        assert_eq!(resolved, ElementRect::new(10, 50, 120, 20));
    }

    #[test]
    fn click_point_picks_smallest_containing_rect() {
        let snap = snapshot(vec![
            snap_el("", "DIV", "", ElementRect::new(0, 0, 1000, 600)),
            snap_el("", "BUTTON", "", ElementRect::new(90, 90, 40, 40)),
        ]);
        let desc = descriptor("SPAN", "", "");
        let resolved = resolve_target(&snap, &desc, Some(ClickPoint::new(100, 100))).unwrap();
        assert_eq!(resolved, ElementRect::new(90, 90, 40, 40));
    }

    #[test]
    fn synthetic_rect_is_the_last_resort() {
        let snap = snapshot(vec![]);
        let desc = descriptor("SPAN", "", "");
        let resolved = resolve_target(&snap, &desc, Some(ClickPoint::new(300, 300))).unwrap();
        assert_eq!(resolved, ElementRect::new(280, 280, 40, 40));
    }

    #[test]
    fn no_click_and_no_match_yields_nothing() {
        let snap = snapshot(vec![]);
        let desc = descriptor("SPAN", "", "");
        assert!(resolve_target(&snap, &desc, None).is_none());
    }

    #[test]
    fn plan_expands_highlight_and_labels_above() {
        let desc = descriptor("BUTTON", "go", "Submit order now");
        let plan = build_plan(
            ElementRect::new(100, 200, 80, 30),
            &desc,
            Viewport {
                width: 1280,
                height: 800,
            },
        );
        assert_eq!(plan.highlight, ElementRect::new(97, 197, 86, 36));
        assert_eq!(plan.label_position.y, 165);
        assert!(plan.label.starts_with("BUTTON#go"));
        assert!(plan.label.contains("Submit order now"));
    }

    #[test]
    fn plan_flips_below_near_the_top_edge() {
        let desc = descriptor("A", "", "");
        let plan = build_plan(
            ElementRect::new(5, 10, 60, 20),
            &desc,
            Viewport {
                width: 1280,
                height: 800,
            },
        );
        assert_eq!(plan.label_position.y, 40);
        assert_eq!(plan.label_position.x, 10);
    }

    #[test]
    fn long_text_is_clipped_in_the_label() {
        let desc = descriptor(
            "BUTTON",
            "",
            "An exceedingly verbose call to action label",
        );
        let plan = build_plan(
            ElementRect::new(100, 200, 80, 30),
            &desc,
            Viewport::default(),
        );
        assert!(plan.label.ends_with("...\""));
    }
}
