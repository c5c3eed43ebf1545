//! A small selector language: compound simple selectors joined by commas.
//!
//! Supported: `tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]` (value optionally
//! quoted) and any compound of them such as `video.ad[data-kind="promo"]`.
//! Combinators are not supported; scope a query with an explicit root instead.

use crate::error::DomError;
use crate::node::Node;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Compound>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Selector {
    /// Parses a selector list.
    ///
    /// # Errors
    ///
    /// Returns [`DomError::InvalidSelector`] for empty input, empty alternatives,
    /// combinators or malformed simple selectors.
    pub fn parse(source: &str) -> Result<Self, DomError> {
        let alternatives = source
            .split(',')
            .map(|part| Compound::parse(part.trim(), source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { source: source.trim().to_owned(), alternatives })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches_node(&self, node: &Node) -> bool {
        self.alternatives.iter().any(|c| c.matches(node))
    }
}

impl FromStr for Selector {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Compound {
    fn parse(part: &str, source: &str) -> Result<Self, DomError> {
        if part.is_empty() {
            return Err(DomError::selector(source, "empty selector"));
        }

        let mut compound = Self::default();
        let mut rest = part;

        if let Some(tail) = rest.strip_prefix('*') {
            rest = tail;
        } else {
            let (tag, tail) = split_ident(rest);
            if !tag.is_empty() {
                compound.tag = Some(tag.to_ascii_lowercase());
            }
            rest = tail;
        }

        while let Some(marker) = rest.chars().next() {
            let tail = &rest[marker.len_utf8()..];
            rest = match marker {
                '#' => {
                    let (id, tail) = non_empty_ident(tail, source, "expected id after '#'")?;
                    compound.id = Some(id.to_owned());
                    tail
                },
                '.' => {
                    let (class, tail) = non_empty_ident(tail, source, "expected class after '.'")?;
                    compound.classes.push(class.to_owned());
                    tail
                },
                '[' => {
                    let (body, tail) = tail
                        .split_once(']')
                        .ok_or_else(|| DomError::selector(source, "unterminated attribute selector"))?;
                    compound.attributes.push(parse_attribute(body, source)?);
                    tail
                },
                c if c.is_whitespace() => {
                    return Err(DomError::selector(source, "combinators are not supported"));
                },
                _ => return Err(DomError::selector(source, format!("unexpected character '{marker}'"))),
            };
        }

        Ok(compound)
    }

    fn matches(&self, node: &Node) -> bool {
        self.tag.as_ref().is_none_or(|tag| *tag == node.tag)
            && self.id.as_ref().is_none_or(|id| node.attributes.get("id") == Some(id))
            && self.classes.iter().all(|c| node.classes.contains(c))
            && self.attributes.iter().all(|(name, expected)| {
                node.attributes
                    .get(name)
                    .is_some_and(|actual| expected.as_ref().is_none_or(|e| e == actual))
            })
    }
}

fn parse_attribute(body: &str, source: &str) -> Result<(String, Option<String>), DomError> {
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => (name.trim(), Some(unquote(value.trim()))),
        None => (body.trim(), None),
    };
    let (ident, tail) = split_ident(name);
    if ident.is_empty() || !tail.is_empty() {
        return Err(DomError::selector(source, "malformed attribute name"));
    }
    Ok((ident.to_ascii_lowercase(), value.map(str::to_owned)))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q).and_then(|v| v.strip_suffix(q)))
        .unwrap_or(value)
}

fn split_ident(input: &str) -> (&str, &str) {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(input.len());
    input.split_at(end)
}

fn non_empty_ident<'a>(
    input: &'a str,
    source: &str,
    message: &'static str,
) -> Result<(&'a str, &'a str), DomError> {
    let (ident, tail) = split_ident(input);
    if ident.is_empty() { Err(DomError::selector(source, message)) } else { Ok((ident, tail)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str, id: Option<&str>, classes: &[&str], attrs: &[(&str, &str)]) -> Node {
        let mut node = Node::new(tag);
        if let Some(id) = id {
            node.attributes.insert("id".to_owned(), id.to_owned());
        }
        node.classes.extend(classes.iter().map(|c| (*c).to_owned()));
        node.attributes.extend(attrs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())));
        node
    }

    #[test]
    fn matches_compound_selectors() {
        let video = node("video", Some("v1"), &["ad", "wide"], &[("data-kind", "promo")]);

        for source in ["video", "*", "#v1", ".ad.wide", "video#v1.ad", "[data-kind]", "[data-kind=promo]", "[data-kind=\"promo\"]"] {
            let selector = Selector::parse(source).unwrap();
            assert!(selector.matches_node(&video), "{source} should match");
        }
        for source in ["div", "#v2", ".ad.narrow", "[data-kind=other]", "[missing]"] {
            let selector = Selector::parse(source).unwrap();
            assert!(!selector.matches_node(&video), "{source} should not match");
        }
    }

    #[test]
    fn comma_lists_match_any_alternative() {
        let selector = Selector::parse("div.card, video").unwrap();
        assert!(selector.matches_node(&node("video", None, &[], &[])));
        assert!(selector.matches_node(&node("div", None, &["card"], &[])));
        assert!(!selector.matches_node(&node("div", None, &[], &[])));
    }

    #[test]
    fn tags_are_case_insensitive() {
        let selector = Selector::parse("VIDEO").unwrap();
        assert!(selector.matches_node(&Node::new("video")));
    }

    #[test]
    fn rejects_malformed_input() {
        for source in ["", " , video", "#", ".", "[unterminated", "#feed video", "video>", "[=x]"] {
            assert!(
                matches!(Selector::parse(source), Err(DomError::InvalidSelector { .. })),
                "{source:?} should be rejected"
            );
        }
    }
}
