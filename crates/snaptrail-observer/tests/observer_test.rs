use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use snaptrail_common::element::{ClickPoint, ElementDescriptor, ElementRect};
use snaptrail_common::protocol::{Ack, PagePush, Reply, Request, StateReply};
use snaptrail_observer::events::{ClickEvent, DomEvent, SubmitEvent};
use snaptrail_observer::{CoordinatorLink, LinkError, ObserverConfig, PageObserver, PageSurface, Tone};

/// Stands in for the coordinator: answers state queries from a settable flag
/// and records every request the observer sends.
#[derive(Default)]
struct MockLink {
    active: Mutex<bool>,
    requests: Mutex<Vec<Request>>,
    capture_reply: Mutex<Option<Ack>>,
}

impl MockLink {
    async fn set_active(&self, active: bool) {
        *self.active.lock().await = active;
    }

    async fn reject_captures_with(&self, error: &str) {
        *self.capture_reply.lock().await = Some(Ack::error(error));
    }

    async fn interaction_captures(&self) -> Vec<Request> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| matches!(r, Request::InteractionCapture(_)))
            .cloned()
            .collect()
    }

    async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl CoordinatorLink for MockLink {
    async fn ask(&self, request: Request) -> Result<Reply, LinkError> {
        self.requests.lock().await.push(request.clone());
        match request {
            Request::GetState => Ok(Reply::State(StateReply {
                session_active: *self.active.lock().await,
                debug_mode: false,
            })),
            Request::InteractionCapture(_) | Request::CaptureScreenshot(_) => {
                if let Some(reply) = self.capture_reply.lock().await.clone() {
                    return Ok(Reply::Ack(reply));
                }
                Ok(Reply::Ack(
                    Ack::ok().with_filename("SnapTrail/example.com/001_screenshot.png"),
                ))
            }
            _ => Ok(Reply::Ack(Ack::ok())),
        }
    }
}

#[derive(Default)]
struct MockSurface {
    mounts: Mutex<u32>,
    removals: Mutex<u32>,
    toasts: Mutex<Vec<(String, Tone)>>,
    flashes: Mutex<Vec<ElementRect>>,
}

#[async_trait]
impl PageSurface for MockSurface {
    async fn mount_capture_button(&self) {
        *self.mounts.lock().await += 1;
    }

    async fn remove_capture_button(&self) {
        *self.removals.lock().await += 1;
    }

    async fn toast(&self, message: &str, tone: Tone) {
        self.toasts.lock().await.push((message.to_string(), tone));
    }

    async fn flash(&self, rect: ElementRect) {
        self.flashes.lock().await.push(rect);
    }
}

fn fixture() -> (PageObserver, Arc<MockLink>, Arc<MockSurface>) {
    let link = Arc::new(MockLink::default());
    let surface = Arc::new(MockSurface::default());
    let observer = PageObserver::new(
        link.clone(),
        surface.clone(),
        ObserverConfig {
            cooldown_ms: 120,
            reconcile_delay_ms: 20,
        },
    );
    (observer, link, surface)
}

fn button(text: &str) -> ElementDescriptor {
    ElementDescriptor {
        tag_name: "BUTTON".to_string(),
        text: text.to_string(),
        position: Some(ElementRect::new(100, 200, 80, 30)),
        ..ElementDescriptor::default()
    }
}

fn click(element: ElementDescriptor) -> DomEvent {
    DomEvent::Click(ClickEvent {
        element,
        point: Some(ClickPoint::new(105, 205)),
    })
}

#[tokio::test]
async fn init_adopts_a_running_session_without_a_toast() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;

    observer.init().await.unwrap();

    assert!(observer.session_active().await);
    assert!(observer.intake_armed().await);
    assert_eq!(*surface.mounts.lock().await, 1);
    assert!(surface.toasts.lock().await.is_empty());
}

#[tokio::test]
async fn init_stays_dark_without_a_session() {
    let (observer, _link, surface) = fixture();

    observer.init().await.unwrap();

    assert!(!observer.session_active().await);
    assert_eq!(*surface.mounts.lock().await, 0);
    assert_eq!(*surface.removals.lock().await, 0);
    assert!(surface.toasts.lock().await.is_empty());
}

#[tokio::test]
async fn state_pushes_toggle_affordances_with_toasts() {
    let (observer, link, surface) = fixture();

    link.set_active(true).await;
    let ack = observer.handle_push(PagePush::state(true)).await;
    assert!(ack.success);
    assert!(observer.session_active().await);
    assert_eq!(*surface.mounts.lock().await, 1);

    link.set_active(false).await;
    let ack = observer.handle_push(PagePush::state(false)).await;
    assert!(ack.success);
    assert!(!observer.session_active().await);
    assert_eq!(*surface.removals.lock().await, 1);

    // Let the scheduled reconciles run; with no drift they change nothing.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(*surface.mounts.lock().await, 1);
    assert_eq!(*surface.removals.lock().await, 1);
    let toasts = surface.toasts.lock().await;
    assert_eq!(
        *toasts,
        vec![
            ("Recording session started".to_string(), Tone::Success),
            ("Recording session stopped".to_string(), Tone::Info),
        ]
    );
}

#[tokio::test]
async fn clicks_become_interaction_captures() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    observer.on_dom_event(click(button("Add to cart"))).await;

    let captures = link.interaction_captures().await;
    assert_eq!(captures.len(), 1);
    let Request::InteractionCapture(request) = &captures[0] else {
        unreachable!()
    };
    assert_eq!(request.element_type, "button");
    assert!(request.element_info.is_interactive);
    // Element-rect center wins over the raw event coordinates.
    assert_eq!(request.click_position, Some(ClickPoint::new(140, 215)));
    assert_eq!(
        *surface.flashes.lock().await,
        vec![ElementRect::new(100, 200, 80, 30)]
    );
}

#[tokio::test]
async fn raw_coordinates_used_when_the_rect_is_missing() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    let mut element = button("Go");
    element.position = None;
    observer.on_dom_event(click(element)).await;

    let captures = link.interaction_captures().await;
    assert_eq!(captures.len(), 1);
    let Request::InteractionCapture(request) = &captures[0] else {
        unreachable!()
    };
    assert_eq!(request.click_position, Some(ClickPoint::new(105, 205)));
    assert!(surface.flashes.lock().await.is_empty());
}

#[tokio::test]
async fn clicks_are_dropped_while_inactive() {
    let (observer, link, _surface) = fixture();

    observer.on_dom_event(click(button("Add to cart"))).await;

    // Not even a state query goes out for a gated interaction.
    assert_eq!(link.request_count().await, 0);
}

#[tokio::test]
async fn non_interactive_targets_are_filtered_locally() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    let div = ElementDescriptor {
        tag_name: "DIV".to_string(),
        text: "just text".to_string(),
        ..ElementDescriptor::default()
    };
    observer.on_dom_event(click(div)).await;

    // Only the init state query reached the coordinator.
    assert_eq!(link.request_count().await, 1);
    assert!(surface.flashes.lock().await.is_empty());
}

#[tokio::test]
async fn cooldown_drops_rapid_interactions() {
    let (observer, link, _surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    observer.on_dom_event(click(button("First"))).await;
    observer.on_dom_event(click(button("Second"))).await;
    assert_eq!(link.interaction_captures().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    observer.on_dom_event(click(button("Third"))).await;
    assert_eq!(link.interaction_captures().await.len(), 2);
}

#[tokio::test]
async fn submits_capture_as_form_submit() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    let form = ElementDescriptor {
        tag_name: "FORM".to_string(),
        id: "checkout".to_string(),
        position: Some(ElementRect::new(50, 60, 400, 300)),
        ..ElementDescriptor::default()
    };
    observer.on_dom_event(DomEvent::Submit(SubmitEvent { form })).await;

    let captures = link.interaction_captures().await;
    assert_eq!(captures.len(), 1);
    let Request::InteractionCapture(request) = &captures[0] else {
        unreachable!()
    };
    // Submits bypass the interactive filter and carry a fixed type.
    assert_eq!(request.element_type, "form-submit");
    assert_eq!(request.element_info.id, "checkout");
    assert_eq!(surface.flashes.lock().await.len(), 1);
}

#[tokio::test]
async fn double_check_drops_interactions_for_a_dead_session() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();

    // The session ends coordinator-side without this page hearing about it.
    link.set_active(false).await;
    observer.on_dom_event(click(button("Too late"))).await;

    assert!(link.interaction_captures().await.is_empty());
    assert!(surface.flashes.lock().await.is_empty());
    assert!(!observer.session_active().await);
}

#[tokio::test]
async fn capture_rejection_disarms_the_page() {
    let (observer, link, _surface) = fixture();
    link.set_active(true).await;
    observer.init().await.unwrap();
    link.reject_captures_with("Session not active").await;

    observer.on_dom_event(click(button("First"))).await;
    assert!(!observer.session_active().await);

    // The gate now drops everything without asking the coordinator.
    tokio::time::sleep(Duration::from_millis(150)).await;
    observer.on_dom_event(click(button("Second"))).await;
    assert_eq!(link.interaction_captures().await.len(), 1);
}

#[tokio::test]
async fn force_end_tears_down_unconditionally() {
    let (observer, _link, surface) = fixture();

    let ack = observer.handle_push(PagePush::force_end(1_700_000_000_000)).await;
    assert!(ack.success);
    assert_eq!(*surface.removals.lock().await, 1);

    // Repeat delivery is safe.
    observer.handle_push(PagePush::force_end(1_700_000_000_001)).await;
    assert_eq!(*surface.removals.lock().await, 2);
    let toasts = surface.toasts.lock().await;
    assert_eq!(toasts.len(), 2);
    assert_eq!(toasts[0].0, "Recording session force ended");
    assert_eq!(toasts[0].1, Tone::Info);
}

#[tokio::test]
async fn reconcile_adopts_coordinator_state_silently() {
    let (observer, link, surface) = fixture();
    link.set_active(true).await;

    observer.reconcile().await;

    assert!(observer.session_active().await);
    assert_eq!(*surface.mounts.lock().await, 1);
    assert!(surface.toasts.lock().await.is_empty());
}

#[tokio::test]
async fn manual_capture_toasts_by_outcome() {
    let (observer, link, surface) = fixture();

    observer.capture_manual().await;
    assert_eq!(
        surface.toasts.lock().await.last().cloned(),
        Some(("Screenshot captured".to_string(), Tone::Success))
    );

    link.reject_captures_with("Session ended").await;
    observer.capture_manual().await;
    assert_eq!(
        surface.toasts.lock().await.last().cloned(),
        Some(("Screenshot failed".to_string(), Tone::Error))
    );
}

#[tokio::test]
async fn page_event_payloads_parse() {
    let click: DomEvent = serde_json::from_str(
        r#"{"event":"click","element":{"tagName":"BUTTON","text":"Go"},"point":{"x":5,"y":6}}"#,
    )
    .unwrap();
    let DomEvent::Click(click) = click else {
        panic!("expected a click event");
    };
    assert_eq!(click.element.tag_name, "BUTTON");
    assert_eq!(click.point, Some(ClickPoint::new(5, 6)));

    let submit: DomEvent = serde_json::from_str(
        r#"{"event":"submit","form":{"tagName":"FORM","id":"login"}}"#,
    )
    .unwrap();
    assert!(matches!(submit, DomEvent::Submit(_)));
}
