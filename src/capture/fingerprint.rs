//! Structural element descriptors used to find the same element again in a
//! different DOM instance.

use serde::{Deserialize, Serialize};

use crate::dom::{css_escape, nth_of_type, DomHost, NodeId};

/// Maximum number of segments in a generated CSS path.
pub const MAX_PATH_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFingerprint {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
}

impl ElementFingerprint {
    /// Describe `node`, or `None` if it is not an element.
    pub fn of<H: DomHost + ?Sized>(host: &H, node: NodeId) -> Option<Self> {
        let tag_name = host.tag_name(node)?.to_string();
        Some(Self {
            tag_name,
            id: host.element_id(node).map(str::to_string),
            classes: host.class_list(node).into_iter().map(str::to_string).collect(),
            css_path: css_path(host, node),
        })
    }

    /// Selector built from tag, id and classes alone, e.g. `button#go.primary`.
    pub fn synthesized_selector(&self) -> String {
        let mut selector = css_escape(&self.tag_name);
        if let Some(id) = &self.id {
            selector.push('#');
            selector.push_str(&css_escape(id));
        }
        for class in &self.classes {
            selector.push('.');
            selector.push_str(&css_escape(class));
        }
        selector
    }
}

/// Short child-combinator path ending at `node`.
///
/// At most [`MAX_PATH_DEPTH`] segments. The walk stops early at the first
/// element carrying an id, which anchors the path. Same-tag siblings are
/// disambiguated with `:nth-of-type`.
pub fn css_path<H: DomHost + ?Sized>(host: &H, node: NodeId) -> Option<String> {
    host.tag_name(node)?;

    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(element) = current {
        if segments.len() == MAX_PATH_DEPTH {
            break;
        }
        let Some(tag) = host.tag_name(element) else {
            break;
        };
        if let Some(id) = host.element_id(element) {
            segments.push(format!("{}#{}", tag, css_escape(id)));
            break;
        }
        let segment = match nth_of_type(host, element) {
            Some((index, count)) if count > 1 => format!("{tag}:nth-of-type({index})"),
            _ => tag.to_string(),
        };
        segments.push(segment);
        current = host.parent_element(element);
    }

    segments.reverse();
    Some(segments.join(" > "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn path_stops_at_nearest_id() {
        let doc = Document::parse(
            r#"<html><body><main id="app"><ul><li>a</li><li><span class="x y">b</span></li></ul></main></body></html>"#,
        );
        let span = doc.query_selector("span").unwrap().unwrap();
        let fp = ElementFingerprint::of(&doc, span).unwrap();

        assert_eq!(fp.tag_name, "span");
        assert_eq!(fp.classes, vec!["x", "y"]);
        assert_eq!(
            fp.css_path.as_deref(),
            Some("main#app > ul > li:nth-of-type(2) > span")
        );
        assert_eq!(doc.query_selector(fp.css_path.as_deref().unwrap()).unwrap(), Some(span));
    }

    #[test]
    fn path_is_capped() {
        let doc = Document::parse(
            "<html><body><div><div><div><div><div><p>deep</p></div></div></div></div></div></body></html>",
        );
        let p = doc.query_selector("p").unwrap().unwrap();
        let path = css_path(&doc, p).unwrap();

        assert_eq!(path.split(" > ").count(), MAX_PATH_DEPTH);
        assert_eq!(path, "div > div > div > div > p");
    }

    #[test]
    fn synthesized_selector_escapes_identifiers() {
        let fp = ElementFingerprint {
            tag_name: "button".to_string(),
            id: Some("1st".to_string()),
            classes: vec!["btn".to_string(), "sm:wide".to_string()],
            css_path: None,
        };
        let selector = fp.synthesized_selector();
        assert_eq!(selector, r"button#\31 st.btn.sm\:wide");

        let doc = Document::parse(r#"<button id="1st" class="btn sm:wide">go</button>"#);
        assert!(doc.query_selector(&selector).unwrap().is_some());
    }

    #[test]
    fn non_elements_have_no_fingerprint() {
        let doc = Document::parse("<p>x</p>");
        assert!(ElementFingerprint::of(&doc, doc.root()).is_none());
    }
}
