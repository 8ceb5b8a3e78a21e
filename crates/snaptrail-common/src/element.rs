use serde::{Deserialize, Serialize};

/// Pixel-space rectangle with integer coordinates. Page contexts round
/// fractional layout values before reporting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ElementRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ElementRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> ClickPoint {
        ClickPoint {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    pub fn contains(&self, point: ClickPoint) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Grows the rect outward by `margin` on every side.
    pub fn expanded(&self, margin: i32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + margin * 2,
            height: self.height + margin * 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClickPoint {
    pub x: i32,
    pub y: i32,
}

impl ClickPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Snapshot of the element a page interaction targeted, as reported by the
/// page context. String fields are empty rather than absent so payloads from
/// older page scripts still parse.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub tag_name: String,
    pub text: String,
    pub id: String,
    pub class_name: String,
    pub role: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub href: String,
    pub alt: String,
    pub title: String,
    pub aria_label: String,
    pub placeholder: String,
    pub value: String,
    pub position: Option<ElementRect>,
    pub is_interactive: bool,
    /// Capture time in epoch milliseconds, stamped by the page context.
    pub timestamp: Option<i64>,
}

impl ElementDescriptor {
    /// True when the descriptor carries a class token equal to `name`.
    /// `class_name` is the space-joined class list, so substring checks
    /// would also match `button-group`.
    pub fn has_class(&self, name: &str) -> bool {
        self.class_name
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case(name))
    }

    /// The wire `type` attribute when present, otherwise the lowercased tag
    /// name. Used for human-readable capture reasons.
    pub fn kind(&self) -> String {
        if self.element_type.is_empty() {
            self.tag_name.to_lowercase()
        } else {
            self.element_type.clone()
        }
    }
}
