//! Sanitized, self-contained HTML snapshots of a live document.
//!
//! Steps, in order: deep clone, script policy, exclusion removal, resource
//! pass, aggressive pass, provenance metadata. A failing resource only
//! degrades that resource; `capture` itself cannot fail.

mod fetch;
mod origin;
mod policy;
mod resources;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;

use crate::config::RecorderConfig;
use crate::dom::{Document, DomHost, NodeKind};
use crate::session::HtmlSnapshot;

pub use fetch::{FetchError, HttpFetcher, OfflineFetcher, ResourceFetcher};
pub use origin::{is_data_uri, resolve, HostPolicy};
pub use resources::{placeholder_image_uri, ResourceReport, INLINED_FROM_ATTR, ORIGINAL_SRC_ATTR};

/// `<meta name=...>` marking a document as a snapshot.
pub const SNAPSHOT_META: &str = "pagetape-snapshot";
/// `<meta name=...>` carrying the capture time.
pub const CAPTURED_AT_META: &str = "pagetape-captured-at";

#[derive(Clone)]
pub struct SnapshotPipeline {
    config: RecorderConfig,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl SnapshotPipeline {
    pub fn new(config: RecorderConfig, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { config, fetcher }
    }

    /// Snapshot `live` without touching it.
    pub async fn capture(&self, live: &Document, captured_at: DateTime<Utc>) -> HtmlSnapshot {
        let (html, report) = self.sanitize(live.clone(), captured_at).await;
        tracing::info!(
            bytes = html.len(),
            inlined = report.inlined,
            failed = report.failed,
            placeholders = report.placeholders,
            removed = report.removed,
            "Captured HTML snapshot"
        );
        HtmlSnapshot { html, captured_at }
    }

    async fn sanitize(
        &self,
        mut doc: Document,
        captured_at: DateTime<Utc>,
    ) -> (String, ResourceReport) {
        let page = doc.url().and_then(|u| Url::parse(u).ok());
        let config = &self.config;

        policy::apply_script_policy(&mut doc, config, page.as_ref());
        policy::remove_excluded(&mut doc, &config.exclude_element_selectors);

        let mut report = ResourceReport::default();
        if config.optimization_level.optimizes_resources() {
            report =
                resources::optimize_resources(&mut doc, config, page.as_ref(), self.fetcher.as_ref())
                    .await;
            if config.optimization_level.is_aggressive() {
                resources::aggressive_pass(&mut doc);
            }
        }

        stamp_provenance(&mut doc, captured_at);
        (serialize_with_doctype(&mut doc), report)
    }
}

impl std::fmt::Debug for SnapshotPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn stamp_provenance(doc: &mut Document, captured_at: DateTime<Utc>) {
    let head = doc.ensure_head();
    for (name, content) in [
        (SNAPSHOT_META, "true".to_string()),
        (
            CAPTURED_AT_META,
            captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ] {
        let meta = doc.create_element("meta");
        doc.set_attr(meta, "name", name);
        doc.set_attr(meta, "content", &content);
        doc.append_child(head, meta);
    }
}

fn serialize_with_doctype(doc: &mut Document) -> String {
    let root = doc.root();
    let doctypes: Vec<_> = doc
        .child_nodes(root)
        .iter()
        .copied()
        .filter(|n| matches!(doc.kind(*n), Some(NodeKind::Doctype(_))))
        .collect();
    for doctype in doctypes {
        doc.remove_node(doctype);
    }
    format!("<!DOCTYPE html>{}", doc.to_html())
}
