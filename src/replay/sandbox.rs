//! Isolated replay document.
//!
//! The sandbox owns its own [`Document`], parsed from the replay content,
//! and shares nothing with any host page. Synthetic events dispatched into
//! it are kept in a bounded log (oldest dropped first) so an embedder or a
//! test can forward or inspect them.

use std::collections::{HashMap, VecDeque};

use reqwest::Url;

use crate::config::ReplayConfig;
use crate::dom::{Document, DomHost, InteractiveHost, NodeId, Point, Rect, SyntheticEvent};
use crate::session::ViewportInfo;
use crate::snapshot::ResourceFetcher;

use super::ReplayError;

/// Where the recorded viewport lands inside the container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxGeometry {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

impl SandboxGeometry {
    /// Map a recorded client point into container coordinates.
    pub fn project(&self, point: Point) -> Point {
        Point::new(
            self.offset_x + point.x * self.scale,
            self.offset_y + point.y * self.scale,
        )
    }
}

#[derive(Debug)]
pub struct SandboxRenderer {
    document: Document,
    sandboxed: bool,
    capabilities: Vec<String>,
    allow_scripts: bool,
    scale_to_fit: bool,
    viewport: (f64, f64),
    container: Option<(f64, f64)>,
    dispatched: VecDeque<SyntheticEvent>,
    dispatch_limit: usize,
    navigations: Vec<String>,
    element_scroll: HashMap<NodeId, Point>,
}

impl SandboxRenderer {
    pub fn new(config: &ReplayConfig) -> Self {
        let viewport = ViewportInfo::default();
        let mut renderer = Self {
            document: Document::new(),
            sandboxed: config.sandboxed,
            capabilities: config.sandbox_capabilities.clone(),
            allow_scripts: config.allow_scripts,
            scale_to_fit: config.scale_to_fit,
            viewport: (viewport.width as f64, viewport.height as f64),
            container: None,
            dispatched: VecDeque::new(),
            dispatch_limit: config.dispatch_log_limit,
            navigations: Vec::new(),
            element_scroll: HashMap::new(),
        };
        renderer.sync_viewport();
        renderer
    }

    /// Value for the frame's `sandbox` attribute, `None` when unsandboxed.
    pub fn sandbox_attribute(&self) -> Option<String> {
        if !self.sandboxed {
            return None;
        }
        let mut tokens = self.capabilities.clone();
        if self.allow_scripts && !tokens.iter().any(|t| t == "allow-scripts") {
            tokens.push("allow-scripts".to_string());
        }
        Some(tokens.join(" "))
    }

    pub fn scripts_enabled(&self) -> bool {
        !self.sandboxed || self.allow_scripts
    }

    /// Replace the document with `html`. Scripts are dropped when the
    /// sandbox does not allow them.
    pub fn load_html(&mut self, html: &str, url: Option<&str>) {
        let mut document = Document::parse(html);
        if let Some(url) = url {
            document.set_url(url);
        }
        if !self.scripts_enabled() {
            let scripts: Vec<NodeId> = document
                .descendants(document.root())
                .into_iter()
                .filter(|n| document.tag_name(*n) == Some("script"))
                .collect();
            for script in &scripts {
                document.remove_node(*script);
            }
            if !scripts.is_empty() {
                tracing::debug!(removed = scripts.len(), "Stripped scripts from sandbox");
            }
        }
        self.document = document;
        self.dispatched.clear();
        self.navigations.clear();
        self.element_scroll.clear();
        self.sync_viewport();
    }

    /// Fetch page markup for URL-backed replay.
    pub async fn fetch_page(fetcher: &dyn ResourceFetcher, url: &str) -> Result<String, ReplayError> {
        let parsed =
            Url::parse(url).map_err(|e| ReplayError::Load(format!("invalid URL {url}: {e}")))?;
        fetcher
            .fetch_text(&parsed)
            .await
            .map_err(|e| ReplayError::Load(e.to_string()))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Size of the recorded viewport being replayed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width as f64, height as f64);
        self.sync_viewport();
    }

    /// Size of the area the sandbox is displayed in.
    pub fn set_container(&mut self, width: f64, height: f64) {
        self.container = Some((width, height));
    }

    pub fn geometry(&self) -> SandboxGeometry {
        let (width, height) = self.viewport;
        match self.container {
            Some((cw, ch)) if self.scale_to_fit && width > 0.0 && height > 0.0 => {
                let scale = (cw / width).min(ch / height);
                SandboxGeometry {
                    scale,
                    offset_x: (cw - width * scale) / 2.0,
                    offset_y: (ch - height * scale) / 2.0,
                    width,
                    height,
                }
            }
            _ => SandboxGeometry {
                scale: 1.0,
                offset_x: 0.0,
                offset_y: 0.0,
                width,
                height,
            },
        }
    }

    pub fn acknowledge_navigation(&mut self, url: impl Into<String>) {
        self.navigations.push(url.into());
    }

    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    pub fn dispatched(&self) -> &VecDeque<SyntheticEvent> {
        &self.dispatched
    }

    pub fn take_dispatched(&mut self) -> Vec<SyntheticEvent> {
        std::mem::take(&mut self.dispatched).into()
    }

    pub fn element_scroll(&self, node: NodeId) -> Option<Point> {
        self.element_scroll.get(&node).copied()
    }

    fn sync_viewport(&mut self) {
        let offset = self.document.scroll_offset();
        self.document
            .set_viewport(Rect::new(offset.x, offset.y, self.viewport.0, self.viewport.1));
    }
}

impl DomHost for SandboxRenderer {
    fn root(&self) -> NodeId {
        self.document.root()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.document.parent(node)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.document.children(node)
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.document.tag_name(node)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.document.attribute(node, name)
    }

    fn bounding_box(&self, node: NodeId) -> Option<Rect> {
        self.document.bounding_box(node)
    }

    fn viewport(&self) -> Rect {
        self.document.viewport()
    }

    fn element_at_point(&self, point: Point) -> Option<NodeId> {
        self.document.element_at_point(point)
    }
}

impl InteractiveHost for SandboxRenderer {
    fn dispatch(&mut self, event: SyntheticEvent) {
        tracing::trace!(event = %event.event_type, target = event.target.0, "Sandbox dispatch");
        if self.dispatch_limit == 0 {
            return;
        }
        while self.dispatched.len() >= self.dispatch_limit {
            self.dispatched.pop_front();
        }
        self.dispatched.push_back(event);
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        self.document.set_attr(node, name, value);
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        self.document.remove_attr(node, name);
    }

    fn scroll_to(&mut self, offset: Point) {
        self.document.set_scroll_offset(offset);
    }

    fn scroll_element(&mut self, node: NodeId, offset: Point) {
        self.element_scroll.insert(node, offset);
    }
}
