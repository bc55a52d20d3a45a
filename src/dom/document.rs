//! In-memory arena document.

use super::{html, DomHost, NodeId, Point, Rect};

/// Node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Doctype(String),
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    layout: Option<Rect>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            layout: None,
        }
    }
}

/// Arena-backed DOM tree.
///
/// Removed nodes stay in the arena, detached from their parent, so node ids
/// held elsewhere never dangle. Cloning a document is a deep clone; the clone
/// shares nothing with the original.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    viewport: Rect,
    url: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Document)],
            viewport: Rect::new(0.0, 0.0, 1024.0, 768.0),
            url: None,
        }
    }

    /// Parse markup into a fresh document. Parsing never fails.
    pub fn parse(markup: &str) -> Self {
        html::parse(markup)
    }

    pub fn to_html(&self) -> String {
        html::serialize(self)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn scroll_offset(&self) -> Point {
        Point::new(self.viewport.x, self.viewport.y)
    }

    pub fn set_scroll_offset(&mut self, offset: Point) {
        self.viewport.x = offset.x;
        self.viewport.y = offset.y;
    }

    pub fn set_layout(&mut self, node: NodeId, rect: Rect) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.layout = Some(rect);
        }
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }

    /// All child nodes (elements, text, comments) in order.
    pub fn child_nodes(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        match self.kind(node) {
            Some(NodeKind::Element { attributes, .. }) => attributes.as_slice(),
            _ => &[],
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        if let Some(NodeKind::Element { attributes, .. }) =
            self.nodes.get_mut(node.0).map(|n| &mut n.kind)
        {
            match attributes.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attributes.push((name, value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        let name = name.to_ascii_lowercase();
        if let Some(NodeKind::Element { attributes, .. }) =
            self.nodes.get_mut(node.0).map(|n| &mut n.kind)
        {
            attributes.retain(|(k, _)| *k != name);
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()))
    }

    pub fn create_doctype(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeKind::Doctype(name.into()))
    }

    /// Detach `node` from its parent. The subtree stays intact in the arena.
    pub fn remove_node(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get(node.0).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != node);
        self.nodes[node.0].parent = None;
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() || parent == child {
            return;
        }
        self.remove_node(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Insert `child` immediately before `reference` under the same parent.
    pub fn insert_before(&mut self, reference: NodeId, child: NodeId) {
        let Some(parent) = self.parent(reference) else {
            return;
        };
        self.remove_node(child);
        let siblings = &mut self.nodes[parent.0].children;
        let index = siblings
            .iter()
            .position(|c| *c == reference)
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Put `replacement` where `old` is and detach `old`.
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeId) {
        if old == replacement || self.parent(old).is_none() {
            return;
        }
        self.insert_before(old, replacement);
        self.remove_node(old);
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root() {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let Some(NodeKind::Text(text)) = self.kind(node) {
            out.push_str(text);
        }
        for child in self.child_nodes(node) {
            self.collect_text(*child, out);
        }
    }

    /// Replace all children of `node` with a single text node.
    pub fn set_text_content(&mut self, node: NodeId, text: impl Into<String>) {
        for child in self.child_nodes(node).to_vec() {
            self.remove_node(child);
        }
        let text = self.create_text(text);
        self.append_child(node, text);
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .into_iter()
            .find(|n| self.tag_name(*n) == Some("html"))
    }

    fn find_first(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|n| self.tag_name(*n) == Some(tag))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.find_first("head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.find_first("body")
    }

    /// Return the head element, creating `<html>` and `<head>` when missing.
    pub fn ensure_head(&mut self) -> NodeId {
        if let Some(head) = self.head() {
            return head;
        }
        let html = match self.document_element() {
            Some(html) => html,
            None => {
                let html = self.create_element("html");
                let existing: Vec<NodeId> = self
                    .child_nodes(self.root())
                    .iter()
                    .copied()
                    .filter(|n| !matches!(self.kind(*n), Some(NodeKind::Doctype(_))))
                    .collect();
                let root = self.root();
                self.append_child(root, html);
                for node in existing {
                    self.append_child(html, node);
                }
                html
            }
        };
        let head = self.create_element("head");
        match self.child_nodes(html).first().copied() {
            Some(first) => self.insert_before(first, head),
            None => self.append_child(html, head),
        }
        head
    }

    /// Index of `node` among its element siblings sharing the same tag (1-based).
    pub fn nth_of_type(&self, node: NodeId) -> Option<(usize, usize)> {
        nth_of_type(self, node)
    }
}

/// Position (1-based) and count of `node` among same-tag element siblings.
pub(crate) fn nth_of_type<H: DomHost + ?Sized>(host: &H, node: NodeId) -> Option<(usize, usize)> {
    let tag = host.tag_name(node)?;
    let parent = host.parent(node)?;
    let mut index = 0;
    let mut count = 0;
    for sibling in host.children(parent) {
        if host.tag_name(sibling) == Some(tag) {
            count += 1;
            if sibling == node {
                index = count;
            }
        }
    }
    (index > 0).then_some((index, count))
}

impl DomHost for Document {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.child_nodes(node)
            .iter()
            .copied()
            .filter(|c| matches!(self.nodes[c.0].kind, NodeKind::Element { .. }))
            .collect()
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        match self.kind(node) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.attributes(node)
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn bounding_box(&self, node: NodeId) -> Option<Rect> {
        self.nodes.get(node.0).and_then(|n| n.layout)
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn element_at_point(&self, point: Point) -> Option<NodeId> {
        let target = Point::new(point.x + self.viewport.x, point.y + self.viewport.y);
        // Later elements in document order paint on top.
        self.descendants(self.root())
            .into_iter()
            .filter(|n| {
                self.bounding_box(*n)
                    .is_some_and(|rect| rect.has_area() && rect.contains(target))
            })
            .last()
    }
}
