//! DOM host abstraction.
//!
//! Capture and replay never touch a concrete platform DOM. They work against
//! [`DomHost`] (read access, hit-testing, selector queries) and
//! [`InteractiveHost`] (synthetic dispatch and mutation), so the same logic
//! can be bound to a browser bridge or to the in-memory [`Document`] used by
//! the sandbox and the snapshot pipeline.

mod document;
pub mod html;
pub mod selector;

use serde::{Deserialize, Serialize};

pub use document::{Document, NodeKind};
pub(crate) use document::nth_of_type;
pub use selector::{css_escape, SelectorError, SelectorList};

/// Index of a node inside a host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A point in viewport (client) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Strict overlap; touching edges do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Read access to a rendered document.
///
/// Implementors supply the structural primitives; selector queries,
/// ancestor matching and the visibility predicate are provided on top.
pub trait DomHost {
    /// The document node (parent of the document element).
    fn root(&self) -> NodeId;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    /// Element children only, in document order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Lower-case tag name, `None` for non-element nodes.
    fn tag_name(&self, node: NodeId) -> Option<&str>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;
    fn bounding_box(&self, node: NodeId) -> Option<Rect>;
    /// The visible viewport rectangle in document coordinates.
    fn viewport(&self) -> Rect;
    /// Topmost element under a client-coordinate point.
    fn element_at_point(&self, point: Point) -> Option<NodeId>;

    fn element_id(&self, node: NodeId) -> Option<&str> {
        self.attribute(node, "id").filter(|id| !id.is_empty())
    }

    fn class_list(&self, node: NodeId) -> Vec<&str> {
        self.attribute(node, "class")
            .map(|classes| classes.split_ascii_whitespace().collect())
            .unwrap_or_default()
    }

    fn is_element(&self, node: NodeId) -> bool {
        self.tag_name(node).is_some()
    }

    /// Parent, but only when it is an element.
    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node).filter(|parent| self.is_element(*parent))
    }

    /// Element descendants of `node` in document order, excluding `node`.
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendants(self.root())
            .into_iter()
            .find(|node| list.matches(self, *node)))
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendants(self.root())
            .into_iter()
            .filter(|node| list.matches(self, *node))
            .collect())
    }

    fn matches(&self, node: NodeId, selector: &str) -> Result<bool, SelectorError> {
        Ok(SelectorList::parse(selector)?.matches(self, node))
    }

    /// Nearest inclusive ancestor matching `selector`.
    fn closest(&self, node: NodeId, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        let mut current = Some(node);
        while let Some(candidate) = current {
            if self.is_element(candidate) && list.matches(self, candidate) {
                return Ok(Some(candidate));
            }
            current = self.parent_element(candidate);
        }
        Ok(None)
    }

    /// Visible iff the bounding box has positive area and intersects the viewport.
    fn is_visible(&self, node: NodeId) -> bool {
        match self.bounding_box(node) {
            Some(rect) => rect.has_area() && rect.intersects(&self.viewport()),
            None => false,
        }
    }
}

/// A synthetic input event dispatched into an [`InteractiveHost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub event_type: String,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl SyntheticEvent {
    pub fn new(event_type: impl Into<String>, target: NodeId) -> Self {
        Self {
            event_type: event_type.into(),
            target,
            position: None,
            key: None,
            detail: None,
        }
    }

    pub fn at(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A host that accepts synthetic events and the state changes they imply.
pub trait InteractiveHost: DomHost {
    fn dispatch(&mut self, event: SyntheticEvent);
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&mut self, node: NodeId, name: &str);
    /// Scroll the viewport to a document offset.
    fn scroll_to(&mut self, offset: Point);
    /// Scroll a scrollable element to an offset.
    fn scroll_element(&mut self, node: NodeId, offset: Point);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection_excludes_touching_edges() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 5.0, 5.0)));
        assert!(!Rect::new(0.0, 0.0, 0.0, 10.0).has_area());
    }

    #[test]
    fn visibility_requires_area_and_viewport_overlap() {
        let mut doc = Document::parse(
            "<html><body><div id=a></div><div id=b></div><div id=c></div></body></html>",
        );
        doc.set_viewport(Rect::new(0.0, 0.0, 100.0, 100.0));
        let a = doc.query_selector("#a").unwrap().unwrap();
        let b = doc.query_selector("#b").unwrap().unwrap();
        let c = doc.query_selector("#c").unwrap().unwrap();
        doc.set_layout(a, Rect::new(10.0, 10.0, 20.0, 20.0));
        doc.set_layout(b, Rect::new(10.0, 500.0, 20.0, 20.0));
        doc.set_layout(c, Rect::new(10.0, 10.0, 0.0, 20.0));

        assert!(doc.is_visible(a));
        assert!(!doc.is_visible(b));
        assert!(!doc.is_visible(c));
    }

    #[test]
    fn closest_walks_inclusive_ancestors() {
        let doc = Document::parse(
            r#"<div class="secret"><form><input id="pw" type="password"></form></div>"#,
        );
        let input = doc.query_selector("#pw").unwrap().unwrap();
        let secret = doc.closest(input, ".secret").unwrap();
        assert!(secret.is_some());
        assert_eq!(doc.closest(input, "input").unwrap(), Some(input));
        assert!(doc.closest(input, ".missing").unwrap().is_none());
    }
}
