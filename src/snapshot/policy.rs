//! Script policy and exclusion removal (the synchronous sanitizing steps).

use reqwest::Url;

use crate::config::{InlineScriptHandling, RecorderConfig, ScriptHandling};
use crate::dom::{Document, DomHost, NodeId};

use super::origin::{resolve, HostPolicy};

/// Strip scripts according to `script_handling`. Returns how many were removed.
pub(crate) fn apply_script_policy(
    doc: &mut Document,
    config: &RecorderConfig,
    page: Option<&Url>,
) -> usize {
    let scripts = elements_by_tag(doc, "script");
    let doomed: Vec<NodeId> = match config.script_handling {
        ScriptHandling::KeepAll => Vec::new(),
        ScriptHandling::Remove => scripts,
        ScriptHandling::KeepSafe => {
            let safe = HostPolicy::new(page, &config.safe_script_sources);
            scripts
                .into_iter()
                .filter(|script| match doc.attribute(*script, "src") {
                    Some(src) => !resolve(page, src).is_some_and(|url| safe.allows(&url)),
                    None => config.inline_script_handling == InlineScriptHandling::Remove,
                })
                .collect()
        }
    };

    for script in &doomed {
        doc.remove_node(*script);
    }
    if !doomed.is_empty() {
        tracing::debug!(
            removed = doomed.len(),
            policy = ?config.script_handling,
            "Applied script policy"
        );
    }
    doomed.len()
}

/// Remove every element matching one of `selectors`. Invalid selectors are
/// skipped.
pub(crate) fn remove_excluded(doc: &mut Document, selectors: &[String]) -> usize {
    let mut removed = 0;
    for selector in selectors {
        match doc.query_selector_all(selector) {
            Ok(nodes) => {
                for node in nodes {
                    if doc.is_attached(node) {
                        doc.remove_node(node);
                        removed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(selector = %selector, error = %e, "Ignoring invalid exclusion selector");
            }
        }
    }
    removed
}

pub(crate) fn elements_by_tag(doc: &Document, tag: &str) -> Vec<NodeId> {
    doc.descendants(doc.root())
        .into_iter()
        .filter(|n| doc.tag_name(*n) == Some(tag))
        .collect()
}
