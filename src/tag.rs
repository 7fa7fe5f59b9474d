//! Qualified names and recorded start tags.

use crate::cursor::{Attribute, EndElement, NamespaceDecl, StartElement, Token};
use std::fmt;

/// Namespace-qualified name. An empty namespace means "no namespace".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Parse Clark notation (`{ns}local`) or a bare local name.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
            Some((ns, local)) => Self::new(ns, local),
            None => Self::new("", s),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Immutable record of an Envelope/Header/Body start tag, kept so the exact
/// wire framing can be replayed on encode.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfoset {
    namespace_uri: String,
    local_name: String,
    prefix: String,
    namespace_decls: Vec<NamespaceDecl>,
    attributes: Vec<Attribute>,
}

impl TagInfoset {
    /// Synthesize a tag with the given prefix bound on it.
    pub fn synthesized(namespace_uri: &str, local_name: &str, prefix: &str, declare: bool) -> Self {
        let namespace_decls = if declare {
            vec![NamespaceDecl::new(prefix, namespace_uri)]
        } else {
            Vec::new()
        };
        Self {
            namespace_uri: namespace_uri.to_string(),
            local_name: local_name.to_string(),
            prefix: prefix.to_string(),
            namespace_decls,
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> QName {
        QName::new(&self.namespace_uri, &self.local_name)
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespace declarations carried on the tag itself.
    pub fn namespace_decls(&self) -> &[NamespaceDecl] {
        &self.namespace_decls
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn start_token(&self) -> Token {
        Token::StartElement(self.to_start())
    }

    pub fn end_token(&self) -> Token {
        Token::EndElement(EndElement {
            namespace_uri: self.namespace_uri.clone(),
            local_name: self.local_name.clone(),
            prefix: self.prefix.clone(),
        })
    }

    pub fn to_start(&self) -> StartElement {
        StartElement {
            namespace_uri: self.namespace_uri.clone(),
            local_name: self.local_name.clone(),
            prefix: self.prefix.clone(),
            namespace_decls: self.namespace_decls.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

impl From<&StartElement> for TagInfoset {
    fn from(start: &StartElement) -> Self {
        Self {
            namespace_uri: start.namespace_uri.clone(),
            local_name: start.local_name.clone(),
            prefix: start.prefix.clone(),
            namespace_decls: start.namespace_decls.clone(),
            attributes: start.attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_clark_notation() {
        let name = QName::parse("{urn:a}Foo");
        assert_eq!(name, QName::new("urn:a", "Foo"));
        assert_eq!(name.to_string(), "{urn:a}Foo");
        assert_eq!(QName::parse("Bar").to_string(), "Bar");
    }

    #[test]
    fn test_tag_replays_start_and_end() {
        let tag = TagInfoset::synthesized("urn:x", "Envelope", "x", true);
        match tag.start_token() {
            Token::StartElement(start) => {
                assert_eq!(start.qualified_name(), "x:Envelope");
                assert_eq!(start.namespace_decls, vec![NamespaceDecl::new("x", "urn:x")]);
            }
            other => panic!("unexpected token {other:?}"),
        }
        assert!(matches!(tag.end_token(), Token::EndElement(end) if end.local_name == "Envelope"));
    }

    #[test]
    fn test_tag_is_a_snapshot_of_the_start_tag() {
        let mut start = StartElement::new("urn:x", "Body", "x")
            .with_decl("y", "urn:y")
            .with_attribute(Attribute::new("urn:y", "id", "y", "1"));
        let tag = TagInfoset::from(&start);
        start.namespace_decls.clear();
        start.attributes.clear();

        assert_eq!(tag.name(), QName::new("urn:x", "Body"));
        assert_eq!(tag.prefix(), "x");
        assert_eq!(tag.namespace_decls(), &[NamespaceDecl::new("y", "urn:y")]);
        assert_eq!(tag.attributes().len(), 1);
        assert_eq!(tag.to_start().attributes[0].value, "1");
    }
}
