//! Tolerant HTML parsing and serialization for [`Document`].
//!
//! This is not a conforming HTML5 tree builder. It handles what sanitized
//! snapshots and recorded pages need: void and raw-text elements, comments,
//! doctype, common entities, and recovery from unbalanced tags.

use super::{Document, DomHost, NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Content is kept verbatim; only the matching end tag terminates it.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Like raw text, but entities are decoded.
const ESCAPABLE_RAW_TEXT_ELEMENTS: &[&str] = &["textarea", "title"];

/// An open element of this tag is closed by a new sibling of the same tag.
const SELF_NESTING_CLOSERS: &[&str] = &["p", "li", "option", "tr", "td", "th", "dt", "dd"];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn parse(input: &str) -> Document {
    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let parent = *stack.last().unwrap_or(&doc.root());

        if let Some(body) = rest.strip_prefix("<!--") {
            let (text, consumed) = match body.find("-->") {
                Some(end) => (&body[..end], 4 + end + 3),
                None => (body, rest.len()),
            };
            let comment = doc.create_comment(text);
            doc.append_child(parent, comment);
            pos += consumed;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let (inner, consumed) = until_tag_close(rest);
            let inner = inner.trim();
            if inner
                .get(..7)
                .is_some_and(|head| head.eq_ignore_ascii_case("doctype"))
            {
                let name = inner[7..].trim();
                let doctype = doc.create_doctype(if name.is_empty() { "html" } else { name });
                doc.append_child(parent, doctype);
            } else {
                let comment = doc.create_comment(inner);
                doc.append_child(parent, comment);
            }
            pos += consumed;
            continue;
        }

        if rest.starts_with("</") {
            let (inner, consumed) = until_tag_close(rest);
            let name = inner.trim().to_ascii_lowercase();
            if let Some(depth) = stack
                .iter()
                .rposition(|n| doc.tag_name(*n) == Some(name.as_str()))
            {
                stack.truncate(depth);
            }
            pos += consumed;
            continue;
        }

        if rest.len() > 1 && rest.as_bytes()[0] == b'<' && rest.as_bytes()[1].is_ascii_alphabetic()
        {
            let (tag, attributes, self_closing, consumed) = parse_start_tag(rest);
            pos += consumed;

            if SELF_NESTING_CLOSERS.contains(&tag.as_str())
                && stack
                    .last()
                    .is_some_and(|top| doc.tag_name(*top) == Some(tag.as_str()))
            {
                stack.pop();
            }
            let parent = *stack.last().unwrap_or(&doc.root());
            let element = doc.create_element(&tag);
            for (name, value) in &attributes {
                if !doc.has_attribute(element, name) {
                    doc.set_attr(element, name, value);
                }
            }
            doc.append_child(parent, element);

            if is_void(&tag) || self_closing {
                continue;
            }

            let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
            let escapable = ESCAPABLE_RAW_TEXT_ELEMENTS.contains(&tag.as_str());
            if raw || escapable {
                let remaining = &input[pos..];
                let closing = format!("</{tag}");
                let lowered = remaining.to_ascii_lowercase();
                let (content, consumed) = match lowered.find(&closing) {
                    Some(start) => {
                        let after = remaining[start..]
                            .find('>')
                            .map(|i| start + i + 1)
                            .unwrap_or(remaining.len());
                        (&remaining[..start], after)
                    }
                    None => (remaining, remaining.len()),
                };
                if !content.is_empty() {
                    let text = if escapable {
                        decode_entities(content)
                    } else {
                        content.to_string()
                    };
                    let text = doc.create_text(text);
                    doc.append_child(element, text);
                }
                pos += consumed;
                continue;
            }

            stack.push(element);
            continue;
        }

        // Plain text up to the next tag opener; a lone '<' is literal text.
        let skip = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        let end = rest[skip..]
            .find('<')
            .map(|i| i + skip)
            .unwrap_or(rest.len());
        let text = doc.create_text(decode_entities(&rest[..end]));
        doc.append_child(parent, text);
        pos += end;
    }

    doc
}

/// Text between a two-byte opener (`</`, `<!`) and the next `>`, plus the
/// bytes consumed including the `>`.
fn until_tag_close(input: &str) -> (&str, usize) {
    let body = &input[2..];
    match body.find('>') {
        Some(end) => (&body[..end], 2 + end + 1),
        None => (body, input.len()),
    }
}

/// Parse `<tag attr=value ...>` at the start of `input`.
///
/// Returns the lower-cased tag, attributes, whether it was self-closing, and
/// the number of bytes consumed.
fn parse_start_tag(input: &str) -> (String, Vec<(String, String)>, bool, usize) {
    let bytes = input.as_bytes();
    let mut i = 1;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1;
    }
    let tag = input[1..i].to_ascii_lowercase();
    let mut attributes = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                self_closing = bytes.get(i + 1) == Some(&b'>');
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = input[name_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let mut value = String::new();
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let start = i + 1;
                    let end = input[start..]
                        .find(quote as char)
                        .map(|e| start + e)
                        .unwrap_or(bytes.len());
                    value = decode_entities(&input[start..end]);
                    i = (end + 1).min(bytes.len());
                }
                Some(_) => {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = decode_entities(&input[start..i]);
                }
                None => {}
            }
        }

        if !name.is_empty() {
            attributes.push((name, value));
        }
    }

    (tag, attributes, self_closing, i)
}

pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let code = if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(input: &str) -> String {
    input.replace('&', "&amp;").replace('"', "&quot;")
}

pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    for child in doc.child_nodes(doc.root()) {
        write_node(doc, *child, &mut out);
    }
    out
}

/// Serialize a single node and its subtree.
pub fn serialize_node(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, node, &mut out);
    out
}

/// Comment text with no `<`, `>` or `--` left, so nothing in it can close
/// the comment or open markup.
fn escape_comment(text: &str) -> String {
    let mut out = text.replace('<', "&lt;").replace('>', "&gt;");
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}

fn write_node(doc: &Document, node: NodeId, out: &mut String) {
    match doc.kind(node) {
        Some(NodeKind::Document) => {
            for child in doc.child_nodes(node) {
                write_node(doc, *child, out);
            }
        }
        Some(NodeKind::Doctype(name)) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push('>');
        }
        Some(NodeKind::Comment(text)) => {
            out.push_str("<!--");
            out.push_str(&escape_comment(text));
            out.push_str("-->");
        }
        Some(NodeKind::Text(text)) => {
            let raw_parent = doc
                .parent(node)
                .and_then(|p| doc.tag_name(p))
                .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
            if raw_parent {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        Some(NodeKind::Element { tag, attributes }) => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(value));
                out.push('"');
            }
            out.push('>');
            if is_void(tag) {
                return;
            }
            for child in doc.child_nodes(node) {
                write_node(doc, *child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        None => {}
    }
}
