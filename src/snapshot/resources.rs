//! Resource pass (stylesheets, scripts, images, fonts, frames, media) and
//! the aggressive optimization pass.

use std::sync::OnceLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Url;

use crate::config::RecorderConfig;
use crate::dom::{Document, DomHost, NodeId};

use super::fetch::{FetchError, ResourceFetcher};
use super::origin::{is_data_uri, resolve, HostPolicy};
use super::policy::elements_by_tag;

/// Attribute holding the URL an inlined resource came from.
pub const INLINED_FROM_ATTR: &str = "data-inlined-from";
/// Attribute holding the original `src` of a placeholder image.
pub const ORIGINAL_SRC_ATTR: &str = "data-original-src";
const PENDING_ATTR: &str = "data-pagetape-pending";

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100"><rect width="100" height="100" fill="#e0e0e0"/><path d="M30 65l12-15 10 12 8-9 12 12z" fill="#bdbdbd"/></svg>"##;

const MEDIA_TAGS: &[&str] = &["video", "audio", "object", "embed"];
const FONT_EXTENSIONS: &[&str] = &[".woff", ".woff2", ".ttf", ".otf", ".eot"];

/// Grey placeholder image as a data URI.
pub fn placeholder_image_uri() -> String {
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(PLACEHOLDER_SVG))
}

/// What the resource pass did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceReport {
    pub inlined: usize,
    pub failed: usize,
    pub placeholders: usize,
    pub removed: usize,
}

enum FetchJob {
    Stylesheet { link: NodeId, url: Url },
    Script { placeholder: NodeId, url: Url, attributes: Vec<(String, String)> },
}

impl FetchJob {
    fn url(&self) -> &Url {
        match self {
            FetchJob::Stylesheet { url, .. } | FetchJob::Script { url, .. } => url,
        }
    }
}

pub(crate) async fn optimize_resources(
    doc: &mut Document,
    config: &RecorderConfig,
    page: Option<&Url>,
    fetcher: &dyn ResourceFetcher,
) -> ResourceReport {
    let hosts = HostPolicy::new(page, &config.allowed_resource_domains);
    let mut report = ResourceReport::default();

    if config.remove_iframes {
        report.removed += remove_all(doc, &["iframe", "frame"]);
    }
    if config.remove_media {
        report.removed += remove_all(doc, MEDIA_TAGS);
    }
    if !config.keep_fonts {
        report.removed += remove_fonts(doc);
    }

    let mut jobs = Vec::new();
    collect_stylesheets(doc, config, page, &hosts, &mut jobs, &mut report);
    collect_scripts(doc, config, page, &hosts, &mut jobs, &mut report);
    process_images(doc, config, page, &hosts, &mut report);

    if jobs.is_empty() {
        return report;
    }

    let timeout_ms = config.fetch_timeout_ms;
    let results: Vec<(FetchJob, Result<String, FetchError>)> = stream::iter(jobs)
        .map(|job| async move {
            let url = job.url().clone();
            let result = if timeout_ms == 0 {
                fetcher.fetch_text(&url).await
            } else {
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    fetcher.fetch_text(&url),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        url: url.to_string(),
                        ms: timeout_ms,
                    }),
                }
            };
            (job, result)
        })
        .buffer_unordered(config.fetch_concurrency.max(1))
        .collect()
        .await;

    for (job, result) in results {
        match result {
            Ok(text) => {
                report.inlined += 1;
                apply_inlined(doc, job, text, config.keep_fonts);
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(url = %job.url(), error = %e, "Resource fetch failed");
                apply_failed(doc, job, &e);
            }
        }
    }

    report
}

fn remove_all(doc: &mut Document, tags: &[&str]) -> usize {
    let doomed: Vec<NodeId> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|n| doc.tag_name(*n).is_some_and(|tag| tags.contains(&tag)))
        .collect();
    let mut removed = 0;
    for node in doomed {
        if doc.is_attached(node) {
            doc.remove_node(node);
            removed += 1;
        }
    }
    removed
}

fn rel_tokens(doc: &Document, node: NodeId) -> Vec<String> {
    doc.attribute(node, "rel")
        .map(|rel| rel.split_ascii_whitespace().map(str::to_ascii_lowercase).collect())
        .unwrap_or_default()
}

fn is_font_link(doc: &Document, link: NodeId) -> bool {
    let rel = rel_tokens(doc, link);
    let preloads_font = rel.iter().any(|r| r == "preload" || r == "prefetch")
        && doc
            .attribute(link, "as")
            .is_some_and(|a| a.eq_ignore_ascii_case("font"));
    let font_href = doc.attribute(link, "href").is_some_and(|href| {
        let path = href.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
        FONT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    });
    preloads_font || font_href
}

fn remove_fonts(doc: &mut Document) -> usize {
    let links: Vec<NodeId> = elements_by_tag(doc, "link")
        .into_iter()
        .filter(|link| is_font_link(doc, *link))
        .collect();
    let removed = links.len();
    for link in links {
        doc.remove_node(link);
    }

    for style in elements_by_tag(doc, "style") {
        let css = doc.text_content(style);
        let stripped = strip_font_faces(&css);
        if stripped != css {
            doc.set_text_content(style, stripped);
        }
    }
    removed
}

fn font_face_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?is)@font-face\s*\{[^}]*\}").ok())
        .as_ref()
}

fn css_url_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"url\(\s*(['"]?)([^'")]*?)['"]?\s*\)"#).ok())
        .as_ref()
}

pub(crate) fn strip_font_faces(css: &str) -> String {
    match font_face_regex() {
        Some(re) => re.replace_all(css, "").into_owned(),
        None => css.to_string(),
    }
}

/// Rewrite relative `url(...)` references so inlined CSS still resolves.
pub(crate) fn absolutize_css_urls(css: &str, stylesheet: &Url) -> String {
    let Some(re) = css_url_regex() else {
        return css.to_string();
    };
    re.replace_all(css, |caps: &regex::Captures<'_>| {
        let quote = caps.get(1).map_or("", |m| m.as_str());
        let reference = caps.get(2).map_or("", |m| m.as_str());
        if reference.is_empty() || is_data_uri(reference) || reference.starts_with('#') {
            return caps[0].to_string();
        }
        match stylesheet.join(reference) {
            Ok(absolute) => format!("url({quote}{absolute}{quote})"),
            Err(_) => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn removal_comment(doc: &mut Document, node: NodeId, text: String) {
    let comment = doc.create_comment(text);
    doc.replace_node(node, comment);
}

fn collect_stylesheets(
    doc: &mut Document,
    config: &RecorderConfig,
    page: Option<&Url>,
    hosts: &HostPolicy,
    jobs: &mut Vec<FetchJob>,
    report: &mut ResourceReport,
) {
    let links: Vec<NodeId> = elements_by_tag(doc, "link")
        .into_iter()
        .filter(|link| rel_tokens(doc, *link).iter().any(|r| r == "stylesheet"))
        .collect();

    for link in links {
        let Some(href) = doc.attribute(link, "href").map(str::to_string) else {
            continue;
        };
        let url = resolve(page, &href);
        let allowed = url.as_ref().is_some_and(|u| hosts.allows(u));
        match url {
            Some(url) if allowed && config.inline_css => {
                jobs.push(FetchJob::Stylesheet { link, url });
            }
            _ if !allowed && !config.keep_external_resources => {
                removal_comment(doc, link, format!(" pagetape: external stylesheet removed: {href} "));
                report.removed += 1;
            }
            _ => {}
        }
    }
}

fn collect_scripts(
    doc: &mut Document,
    config: &RecorderConfig,
    page: Option<&Url>,
    hosts: &HostPolicy,
    jobs: &mut Vec<FetchJob>,
    report: &mut ResourceReport,
) {
    for script in elements_by_tag(doc, "script") {
        let Some(src) = doc.attribute(script, "src").map(str::to_string) else {
            continue;
        };
        let url = resolve(page, &src);
        let allowed = url.as_ref().is_some_and(|u| hosts.allows(u));
        match url {
            Some(url) if allowed => {
                let attributes = doc
                    .attributes(script)
                    .iter()
                    .filter(|(name, _)| !name.eq_ignore_ascii_case("src"))
                    .cloned()
                    .collect();
                // Holds the script's slot while the fetch is in flight.
                let placeholder = doc.create_element("template");
                doc.set_attr(placeholder, PENDING_ATTR, "script");
                doc.replace_node(script, placeholder);
                jobs.push(FetchJob::Script {
                    placeholder,
                    url,
                    attributes,
                });
            }
            _ if !allowed && !config.keep_external_resources => {
                removal_comment(doc, script, format!(" pagetape: external script removed: {src} "));
                report.removed += 1;
            }
            _ => {}
        }
    }
}

fn process_images(
    doc: &mut Document,
    config: &RecorderConfig,
    page: Option<&Url>,
    hosts: &HostPolicy,
    report: &mut ResourceReport,
) {
    let placeholder = placeholder_image_uri();
    for img in elements_by_tag(doc, "img") {
        let Some(src) = doc.attribute(img, "src").map(str::to_string) else {
            continue;
        };
        if is_data_uri(&src) || resolve(page, &src).is_some_and(|url| hosts.allows(&url)) {
            continue;
        }
        if config.remove_invisible_elements && !doc.is_visible(img) {
            doc.remove_node(img);
            report.removed += 1;
        } else if config.use_placeholders_for_images {
            doc.set_attr(img, ORIGINAL_SRC_ATTR, &src);
            doc.set_attr(img, "src", &placeholder);
            doc.remove_attr(img, "srcset");
            report.placeholders += 1;
        }
    }
}

fn apply_inlined(doc: &mut Document, job: FetchJob, text: String, keep_fonts: bool) {
    match job {
        FetchJob::Stylesheet { link, url } => {
            let mut css = absolutize_css_urls(&text, &url);
            if !keep_fonts {
                css = strip_font_faces(&css);
            }
            let style = doc.create_element("style");
            doc.set_attr(style, INLINED_FROM_ATTR, url.as_str());
            if let Some(media) = doc.attribute(link, "media").map(str::to_string) {
                doc.set_attr(style, "media", &media);
            }
            let body = format!(
                "/* inlined from {} */\n{}",
                url,
                css.replace("</style", "<\\/style")
            );
            doc.set_text_content(style, body);
            doc.replace_node(link, style);
        }
        FetchJob::Script {
            placeholder,
            url,
            attributes,
        } => {
            let script = doc.create_element("script");
            for (name, value) in &attributes {
                doc.set_attr(script, name, value);
            }
            doc.set_attr(script, INLINED_FROM_ATTR, url.as_str());
            let body = format!(
                "// inlined from {}\n{}",
                url,
                text.replace("</script", "<\\/script")
            );
            doc.set_text_content(script, body);
            doc.replace_node(placeholder, script);
        }
    }
}

fn apply_failed(doc: &mut Document, job: FetchJob, error: &FetchError) {
    match job {
        FetchJob::Stylesheet { link, url } => {
            removal_comment(
                doc,
                link,
                format!(" pagetape: failed to inline stylesheet {url}: {error} "),
            );
        }
        FetchJob::Script { placeholder, .. } => {
            doc.remove_node(placeholder);
        }
    }
}

/// Level-2 pass: explicit image dimensions, lazy off-screen images,
/// annotated style blocks.
pub(crate) fn aggressive_pass(doc: &mut Document) {
    for img in elements_by_tag(doc, "img") {
        if let Some(rect) = doc.bounding_box(img) {
            if rect.has_area() {
                if !doc.has_attribute(img, "width") {
                    doc.set_attr(img, "width", &format!("{}", rect.width.round() as i64));
                }
                if !doc.has_attribute(img, "height") {
                    doc.set_attr(img, "height", &format!("{}", rect.height.round() as i64));
                }
            }
        }
        if !doc.is_visible(img) {
            doc.set_attr(img, "loading", "lazy");
        }
    }
    for style in elements_by_tag(doc, "style") {
        doc.set_attr(style, "data-optimized", "true");
    }
}
