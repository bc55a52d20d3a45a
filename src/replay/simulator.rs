//! Turns recorded events back into synthetic DOM events on a replay host.

use serde_json::json;

use crate::capture::ElementFingerprint;
use crate::dom::{DomHost, InteractiveHost, NodeId, Point, SyntheticEvent};
use crate::session::{EventPayload, KeyPayload, MouseButton, SessionEvent};

/// Marker attribute on the element the replayed pointer is over.
pub const HOVER_ATTR: &str = "data-pagetape-hover";

const FOCUSABLE: &str = "input, textarea, select, button, a[href], [tabindex]";
const TEXT_INPUT_TYPES: &[&str] = &[
    "text", "password", "email", "search", "tel", "url", "number",
];

/// What applying one event did to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Simulated {
    /// Events were dispatched on this element.
    Dispatched(NodeId),
    /// The host viewport was scrolled.
    Scrolled,
    /// Recorded navigation; it is acknowledged, never followed.
    Navigation(String),
    /// The recorded viewport changed size.
    Resize { width: u32, height: u32 },
    /// No element could be resolved for the event.
    Unresolved,
}

/// Replays pointer, keyboard and scroll events against an [`InteractiveHost`].
///
/// Tracks the hovered and focused elements between events so hover and
/// focus transitions fire in the order a browser would fire them.
#[derive(Debug, Default, Clone)]
pub struct EventSimulator {
    hovered: Option<NodeId>,
    focused: Option<NodeId>,
}

impl EventSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    /// Forget hover and focus, e.g. after the host document was reloaded.
    pub fn reset(&mut self) {
        self.hovered = None;
        self.focused = None;
    }

    pub fn apply<H: InteractiveHost + ?Sized>(
        &mut self,
        host: &mut H,
        event: &SessionEvent,
    ) -> Simulated {
        match &event.payload {
            EventPayload::MouseMove { x, y, target } => {
                self.pointer_move(host, Point::new(*x, *y), target.as_ref())
            }
            EventPayload::MouseClick {
                x,
                y,
                button,
                target,
            } => self.click(host, Point::new(*x, *y), *button, target.as_ref()),
            EventPayload::MouseScroll { x, y, target } => {
                scroll(host, Point::new(*x, *y), target.as_ref())
            }
            EventPayload::KeyDown(key) => self.key(host, "keydown", key),
            EventPayload::KeyUp(key) => self.key(host, "keyup", key),
            EventPayload::Navigation { url, .. } => {
                tracing::debug!(url = %url, "Replayed navigation acknowledged");
                Simulated::Navigation(url.clone())
            }
            EventPayload::Resize { width, height } => Simulated::Resize {
                width: *width,
                height: *height,
            },
            EventPayload::Custom { name, data } => {
                let Some(target) = document_element(&*host) else {
                    return Simulated::Unresolved;
                };
                host.dispatch(SyntheticEvent::new(name.clone(), target).with_detail(data.clone()));
                Simulated::Dispatched(target)
            }
        }
    }

    fn pointer_move<H: InteractiveHost + ?Sized>(
        &mut self,
        host: &mut H,
        position: Point,
        target: Option<&ElementFingerprint>,
    ) -> Simulated {
        let node = resolve_target(&*host, target, Some(position));
        if node != self.hovered {
            if let Some(old) = self.hovered.take() {
                host.dispatch(SyntheticEvent::new("mouseout", old).at(position));
                host.dispatch(SyntheticEvent::new("mouseleave", old).at(position));
                host.remove_attribute(old, HOVER_ATTR);
            }
            if let Some(new) = node {
                host.dispatch(SyntheticEvent::new("mouseover", new).at(position));
                host.dispatch(SyntheticEvent::new("mouseenter", new).at(position));
                host.set_attribute(new, HOVER_ATTR, "");
                self.hovered = Some(new);
            }
        }

        match node {
            Some(node) => {
                host.dispatch(SyntheticEvent::new("mousemove", node).at(position));
                Simulated::Dispatched(node)
            }
            None => Simulated::Unresolved,
        }
    }

    fn click<H: InteractiveHost + ?Sized>(
        &mut self,
        host: &mut H,
        position: Point,
        button: MouseButton,
        target: Option<&ElementFingerprint>,
    ) -> Simulated {
        let Some(node) = resolve_target(&*host, target, Some(position)) else {
            tracing::debug!(x = position.x, y = position.y, "Click target not found");
            return Simulated::Unresolved;
        };

        let detail = json!({ "button": button });
        for kind in ["mousedown", "mouseup", "click"] {
            host.dispatch(
                SyntheticEvent::new(kind, node)
                    .at(position)
                    .with_detail(detail.clone()),
            );
        }

        if button == MouseButton::Left {
            self.focus(host, node);
            activate(host, node);
        }
        Simulated::Dispatched(node)
    }

    fn focus<H: InteractiveHost + ?Sized>(&mut self, host: &mut H, node: NodeId) {
        let focusable = host.closest(node, FOCUSABLE).ok().flatten();
        if focusable == self.focused {
            return;
        }
        if let Some(old) = self.focused.take() {
            host.dispatch(SyntheticEvent::new("blur", old));
        }
        if let Some(new) = focusable {
            host.dispatch(SyntheticEvent::new("focus", new));
            self.focused = Some(new);
        }
    }

    fn key<H: InteractiveHost + ?Sized>(
        &mut self,
        host: &mut H,
        kind: &str,
        key: &KeyPayload,
    ) -> Simulated {
        let Some(node) = resolve_target(&*host, key.target.as_ref(), None).or(self.focused) else {
            return Simulated::Unresolved;
        };
        host.dispatch(
            SyntheticEvent::new(kind, node)
                .with_key(key.key.clone())
                .with_detail(json!({ "code": key.code, "modifiers": key.modifiers })),
        );

        if kind == "keydown" && is_text_entry(&*host, node) {
            let mut value = host.attribute(node, "value").unwrap_or_default().to_string();
            let edited = if key.key == "Backspace" {
                value.pop().is_some()
            } else if key.key.chars().count() == 1 && !key.modifiers.ctrl && !key.modifiers.meta {
                value.push_str(&key.key);
                true
            } else {
                false
            };
            if edited {
                host.set_attribute(node, "value", &value);
                host.dispatch(SyntheticEvent::new("input", node));
            }
        }
        Simulated::Dispatched(node)
    }
}

/// Find the replay-side element for a recorded target.
///
/// Tries the recorded CSS path, then a selector synthesized from tag, id and
/// classes, then hit-testing at `position`.
pub fn resolve_target<H: DomHost + ?Sized>(
    host: &H,
    target: Option<&ElementFingerprint>,
    position: Option<Point>,
) -> Option<NodeId> {
    if let Some(target) = target {
        if let Some(path) = &target.css_path {
            match host.query_selector(path) {
                Ok(Some(node)) => return Some(node),
                Ok(None) => {}
                Err(e) => tracing::debug!(path = %path, error = %e, "Unusable recorded path"),
            }
        }
        if let Ok(Some(node)) = host.query_selector(&target.synthesized_selector()) {
            return Some(node);
        }
    }
    position.and_then(|p| host.element_at_point(p))
}

fn scroll<H: InteractiveHost + ?Sized>(
    host: &mut H,
    offset: Point,
    target: Option<&ElementFingerprint>,
) -> Simulated {
    match resolve_target(&*host, target, None) {
        Some(node) => {
            host.scroll_element(node, offset);
            host.dispatch(SyntheticEvent::new("scroll", node).with_detail(json!({
                "x": offset.x,
                "y": offset.y,
            })));
            Simulated::Dispatched(node)
        }
        None if target.is_none() => {
            host.scroll_to(offset);
            if let Some(root) = document_element(&*host) {
                host.dispatch(SyntheticEvent::new("scroll", root));
            }
            Simulated::Scrolled
        }
        None => Simulated::Unresolved,
    }
}

/// Default actions for a left click: toggle checkables, submit forms.
fn activate<H: InteractiveHost + ?Sized>(host: &mut H, node: NodeId) {
    let tag = host.tag_name(node).unwrap_or_default().to_string();
    let input_type = host
        .attribute(node, "type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match (tag.as_str(), input_type.as_str()) {
        ("input", "checkbox") => {
            if host.attribute(node, "checked").is_some() {
                host.remove_attribute(node, "checked");
            } else {
                host.set_attribute(node, "checked", "");
            }
            host.dispatch(SyntheticEvent::new("change", node));
        }
        ("input", "radio") => {
            if host.attribute(node, "checked").is_some() {
                return;
            }
            for other in radio_group(&*host, node) {
                host.remove_attribute(other, "checked");
            }
            host.set_attribute(node, "checked", "");
            host.dispatch(SyntheticEvent::new("change", node));
        }
        ("input", "submit" | "image") | ("button", "submit" | "") => {
            if let Ok(Some(form)) = host.closest(node, "form") {
                host.dispatch(SyntheticEvent::new("submit", form));
            }
        }
        _ => {
            if let Ok(Some(anchor)) = host.closest(node, "a[href]") {
                let href = host.attribute(anchor, "href").unwrap_or_default();
                tracing::debug!(href = %href, "Link activation not followed during replay");
            }
        }
    }
}

/// Other radios sharing `node`'s name within the same form (or document).
fn radio_group<H: DomHost + ?Sized>(host: &H, node: NodeId) -> Vec<NodeId> {
    let Some(name) = host.attribute(node, "name") else {
        return Vec::new();
    };
    let scope = host
        .closest(node, "form")
        .ok()
        .flatten()
        .unwrap_or_else(|| host.root());
    host.descendants(scope)
        .into_iter()
        .filter(|other| *other != node)
        .filter(|other| host.tag_name(*other) == Some("input"))
        .filter(|other| {
            host.attribute(*other, "type")
                .is_some_and(|t| t.eq_ignore_ascii_case("radio"))
        })
        .filter(|other| host.attribute(*other, "name") == Some(name))
        .collect()
}

fn is_text_entry<H: DomHost + ?Sized>(host: &H, node: NodeId) -> bool {
    match host.tag_name(node) {
        Some("textarea") => true,
        Some("input") => {
            let kind = host
                .attribute(node, "type")
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| "text".to_string());
            TEXT_INPUT_TYPES.contains(&kind.as_str())
        }
        _ => false,
    }
}

fn document_element<H: DomHost + ?Sized>(host: &H) -> Option<NodeId> {
    host.children(host.root()).into_iter().next()
}
