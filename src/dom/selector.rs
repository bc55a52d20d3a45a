//! A small CSS selector engine.
//!
//! Supports what fingerprints and exclusion lists use in practice: type,
//! universal, id, class and attribute selectors, a handful of structural
//! pseudo-classes, descendant/child combinators and selector lists.
//! Matching is generic over [`DomHost`] so it runs against any host.

use thiserror::Error;

use super::document::nth_of_type;
use super::{DomHost, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected {found:?} at offset {offset} in selector {selector:?}")]
    Unexpected {
        selector: String,
        offset: usize,
        found: char,
    },
    #[error("unexpected end of selector {0:?}")]
    UnexpectedEnd(String),
    #[error("unsupported pseudo-class :{0}")]
    UnsupportedPseudo(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    test: Option<(AttrOp, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pseudo {
    NthOfType(usize),
    NthChild(usize),
    FirstChild,
    LastChild,
    FirstOfType,
    LastOfType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttrSelector>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Complex>,
}

impl SelectorList {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        if source.trim().is_empty() {
            return Err(SelectorError::Empty);
        }
        Parser::new(source).parse_list()
    }

    pub fn matches<H: DomHost + ?Sized>(&self, host: &H, node: NodeId) -> bool {
        host.is_element(node)
            && self
                .selectors
                .iter()
                .any(|complex| complex.matches_at(host, node, complex.compounds.len() - 1))
    }
}

impl Complex {
    fn matches_at<H: DomHost + ?Sized>(&self, host: &H, node: NodeId, index: usize) -> bool {
        if !self.compounds[index].matches(host, node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match self.combinators[index - 1] {
            Combinator::Child => host
                .parent_element(node)
                .is_some_and(|parent| self.matches_at(host, parent, index - 1)),
            Combinator::Descendant => {
                let mut current = host.parent_element(node);
                while let Some(ancestor) = current {
                    if self.matches_at(host, ancestor, index - 1) {
                        return true;
                    }
                    current = host.parent_element(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches<H: DomHost + ?Sized>(&self, host: &H, node: NodeId) -> bool {
        let Some(tag) = host.tag_name(node) else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|want| want != tag) {
            return false;
        }
        if let Some(id) = &self.id {
            if host.element_id(node) != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes = host.class_list(node);
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        for attr in &self.attributes {
            let Some(value) = host.attribute(node, &attr.name) else {
                return false;
            };
            let ok = match &attr.test {
                None => true,
                Some((AttrOp::Equals, want)) => value == want.as_str(),
                Some((AttrOp::Includes, want)) => {
                    value.split_ascii_whitespace().any(|v| v == want.as_str())
                }
                Some((AttrOp::Prefix, want)) => {
                    !want.is_empty() && value.starts_with(want.as_str())
                }
                Some((AttrOp::Suffix, want)) => !want.is_empty() && value.ends_with(want.as_str()),
                Some((AttrOp::Substring, want)) => {
                    !want.is_empty() && value.contains(want.as_str())
                }
            };
            if !ok {
                return false;
            }
        }
        self.pseudos.iter().all(|pseudo| match pseudo {
            Pseudo::NthOfType(n) => nth_of_type(host, node).is_some_and(|(i, _)| i == *n),
            Pseudo::FirstOfType => nth_of_type(host, node).is_some_and(|(i, _)| i == 1),
            Pseudo::LastOfType => nth_of_type(host, node).is_some_and(|(i, count)| i == count),
            Pseudo::NthChild(n) => child_position(host, node).is_some_and(|(i, _)| i == *n),
            Pseudo::FirstChild => child_position(host, node).is_some_and(|(i, _)| i == 1),
            Pseudo::LastChild => {
                child_position(host, node).is_some_and(|(i, count)| i == count)
            }
        })
    }
}

fn child_position<H: DomHost + ?Sized>(host: &H, node: NodeId) -> Option<(usize, usize)> {
    let siblings = host.children(host.parent(node)?);
    let index = siblings.iter().position(|s| *s == node)?;
    Some((index + 1, siblings.len()))
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                selector: self.source.to_string(),
                offset: self.pos,
                found,
            },
            None => SelectorError::UnexpectedEnd(self.source.to_string()),
        }
    }

    fn expect(&mut self, want: char) -> Result<(), SelectorError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_list(mut self) -> Result<SelectorList, SelectorError> {
        let mut selectors = Vec::new();
        loop {
            self.skip_whitespace();
            selectors.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(_) => return Err(self.unexpected()),
            }
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_space = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_space => combinators.push(Combinator::Descendant),
                Some(_) => return Err(self.unexpected()),
            }
            compounds.push(self.parse_compound()?);
        }
        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut parsed_any = false;

        if self.peek() == Some('*') {
            self.pos += 1;
            parsed_any = true;
        } else if self.peek().is_some_and(is_ident_start) {
            compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
            parsed_any = true;
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    let class = self.parse_ident()?;
                    compound.classes.push(class);
                }
                Some('[') => {
                    self.pos += 1;
                    let attr = self.parse_attribute()?;
                    compound.attributes.push(attr);
                }
                Some(':') => {
                    self.pos += 1;
                    let pseudo = self.parse_pseudo()?;
                    compound.pseudos.push(pseudo);
                }
                _ => break,
            }
            parsed_any = true;
        }

        if parsed_any {
            Ok(compound)
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let mut out = String::new();
        let start = self.pos;
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    out.push(self.parse_escape()?);
                }
                Some(c) if is_ident_char(c) => {
                    // Identifiers may not begin with a digit (or "-" then digit).
                    let leading_digit = c.is_ascii_digit()
                        && (self.pos == start || (self.pos == start + 1 && out == "-"));
                    if leading_digit {
                        return Err(self.unexpected());
                    }
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.unexpected());
        }
        Ok(out)
    }

    fn parse_escape(&mut self) -> Result<char, SelectorError> {
        let Some(first) = self.peek() else {
            return Err(self.unexpected());
        };
        if !first.is_ascii_hexdigit() {
            self.pos += 1;
            return Ok(first);
        }
        let mut hex = String::new();
        while hex.len() < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            hex.extend(self.bump());
        }
        if self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .filter(|c| *c != '\0')
            .ok_or_else(|| self.unexpected())
    }

    fn parse_attribute(&mut self) -> Result<AttrSelector, SelectorError> {
        self.skip_whitespace();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let op = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(AttrSelector { name, test: None });
            }
            Some('=') => {
                self.pos += 1;
                AttrOp::Equals
            }
            Some(c @ ('~' | '^' | '$' | '*')) => {
                self.pos += 1;
                self.expect('=')?;
                match c {
                    '~' => AttrOp::Includes,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            _ => return Err(self.unexpected()),
        };
        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == quote => break,
                        Some('\\') => value.push(self.parse_escape()?),
                        Some(c) => value.push(c),
                        None => return Err(SelectorError::UnexpectedEnd(self.source.to_string())),
                    }
                }
                value
            }
            _ => self.parse_ident()?,
        };
        self.skip_whitespace();
        self.expect(']')?;
        Ok(AttrSelector {
            name,
            test: Some((op, value)),
        })
    }

    fn parse_pseudo(&mut self) -> Result<Pseudo, SelectorError> {
        let name = self.parse_ident()?.to_ascii_lowercase();
        let argument = if self.peek() == Some('(') {
            self.pos += 1;
            let mut arg = String::new();
            loop {
                match self.bump() {
                    Some(')') => break,
                    Some(c) => arg.push(c),
                    None => return Err(SelectorError::UnexpectedEnd(self.source.to_string())),
                }
            }
            Some(arg.trim().to_string())
        } else {
            None
        };

        let index = |arg: Option<&String>| -> Result<usize, SelectorError> {
            arg.and_then(|a| a.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| SelectorError::UnsupportedPseudo(format!("{name}({arg:?})")))
        };

        match (name.as_str(), argument.as_ref()) {
            ("nth-of-type", arg) => Ok(Pseudo::NthOfType(index(arg)?)),
            ("nth-child", arg) => Ok(Pseudo::NthChild(index(arg)?)),
            ("first-child", None) => Ok(Pseudo::FirstChild),
            ("last-child", None) => Ok(Pseudo::LastChild),
            ("first-of-type", None) => Ok(Pseudo::FirstOfType),
            ("last-of-type", None) => Ok(Pseudo::LastOfType),
            _ => Err(SelectorError::UnsupportedPseudo(name.clone())),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Escape a string for use as a CSS identifier (ids and class names).
pub fn css_escape(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let first_is_dash = ident.starts_with('-');
    if ident == "-" {
        return "\\-".to_string();
    }
    for (index, c) in ident.chars().enumerate() {
        let leading_digit =
            c.is_ascii_digit() && (index == 0 || (index == 1 && first_is_dash));
        if c == '\0' {
            out.push('\u{fffd}');
        } else if leading_digit || c.is_ascii_control() {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if is_ident_char(c) {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
