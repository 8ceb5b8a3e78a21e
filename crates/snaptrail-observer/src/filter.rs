//! Decides which click targets count as interactions worth recording.

use snaptrail_common::element::ElementDescriptor;

const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea"];
const INTERACTIVE_ROLES: &[&str] = &["button", "link", "tab", "menuitem"];
const INTERACTIVE_CLASSES: &[&str] = &["btn", "button"];

/// True for elements a user plausibly interacts with: interactive tags, ARIA
/// interactive roles, or recognized class markers. Everything else (plain
/// text, containers) is ignored by the click listener.
pub fn is_interactive(element: &ElementDescriptor) -> bool {
    if INTERACTIVE_TAGS
        .iter()
        .any(|tag| element.tag_name.eq_ignore_ascii_case(tag))
    {
        return true;
    }
    if INTERACTIVE_ROLES
        .iter()
        .any(|role| element.role.eq_ignore_ascii_case(role))
    {
        return true;
    }
    INTERACTIVE_CLASSES
        .iter()
        .any(|class| element.has_class(class))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str) -> ElementDescriptor {
        ElementDescriptor {
            tag_name: tag.to_string(),
            ..ElementDescriptor::default()
        }
    }

    #[test]
    fn interactive_tags_qualify() {
        assert!(is_interactive(&element("BUTTON")));
        assert!(is_interactive(&element("a")));
        assert!(is_interactive(&element("TEXTAREA")));
        assert!(!is_interactive(&element("DIV")));
        assert!(!is_interactive(&element("SPAN")));
    }

    #[test]
    fn aria_roles_qualify() {
        let mut el = element("DIV");
        el.role = "button".to_string();
        assert!(is_interactive(&el));
        el.role = "presentation".to_string();
        assert!(!is_interactive(&el));
    }

    #[test]
    fn class_markers_match_whole_tokens_only() {
        let mut el = element("DIV");
        el.class_name = "nav-item btn primary".to_string();
        assert!(is_interactive(&el));
        // `button-group` must not match the `button` marker.
        el.class_name = "button-group".to_string();
        assert!(!is_interactive(&el));
    }
}
