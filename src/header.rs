//! SOAP header blocks.
//!
//! A [`Header`] keeps its whole subtree as a shared token buffer and derives
//! `mustUnderstand`, role and relay from the start tag once, using the
//! attribute names of the SOAP version it was read under.

use crate::cursor::{Attribute, BufferedCursor, NamespaceDecl, StartElement, Token};
use crate::error::SoapError;
use crate::tag::QName;
use crate::version::SoapVersion;
use std::collections::HashSet;
use std::sync::Arc;

/// One header block.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    name: QName,
    prefix: String,
    must_understand: bool,
    role: String,
    relay: bool,
    attributes: Vec<Attribute>,
    content: Arc<[Token]>,
}

impl Header {
    /// Build a header from its subtree, starting at its start tag.
    pub fn parse(version: SoapVersion, content: impl Into<Arc<[Token]>>) -> Result<Self, SoapError> {
        let content: Arc<[Token]> = content.into();
        let start = match content.first() {
            Some(Token::StartElement(start)) => start.clone(),
            _ => return Err(SoapError::InvalidEnvelope("header block must start with an element".to_string())),
        };
        check_balanced(&content, &start)?;

        let must_understand = match envelope_attribute(version, &start, "mustUnderstand") {
            Some(value) => parse_bool(value, "mustUnderstand")?,
            None => false,
        };
        let role = match envelope_attribute(version, &start, version.role_attribute()) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => version.implicit_role().to_string(),
        };
        let relay = match version
            .relay_attribute()
            .and_then(|local| envelope_attribute(version, &start, local))
        {
            Some(value) => parse_bool(value, "relay")?,
            None => false,
        };

        Ok(Self {
            name: start.name(),
            prefix: start.prefix.clone(),
            must_understand,
            role,
            relay,
            attributes: start.attributes,
            content,
        })
    }

    /// Convenience for a header holding a single text value.
    pub fn text(version: SoapVersion, name: QName, prefix: &str, value: &str) -> Result<Self, SoapError> {
        let start = StartElement::new(&name.namespace, &name.local, prefix).with_decl(prefix, &name.namespace);
        Self::parse(version, text_block(start, value))
    }

    /// Like [`Header::text`] with extra attributes on the block.
    pub fn text_with_attributes(
        version: SoapVersion,
        name: QName,
        prefix: &str,
        value: &str,
        attributes: Vec<Attribute>,
    ) -> Result<Self, SoapError> {
        let mut start = StartElement::new(&name.namespace, &name.local, prefix).with_decl(prefix, &name.namespace);
        start.attributes = attributes;
        Self::parse(version, text_block(start, value))
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn must_understand(&self) -> bool {
        self.must_understand
    }

    /// Role (actor) this block targets; never empty.
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_relay(&self) -> bool {
        self.relay
    }

    /// Non-namespace attributes in document order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Attribute lookup. Duplicates resolve to the last occurrence.
    pub fn attribute(&self, namespace_uri: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|a| a.namespace_uri == namespace_uri && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// The buffered subtree, start tag included.
    pub fn tokens(&self) -> &Arc<[Token]> {
        &self.content
    }

    /// Replay the subtree. `inherited` are the bindings from the envelope.
    pub fn cursor(&self, inherited: Vec<NamespaceDecl>) -> BufferedCursor {
        BufferedCursor::new(Arc::clone(&self.content), inherited)
    }

    /// Concatenated character content of the block.
    pub fn string_value(&self) -> String {
        self.content
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) | Token::CData(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether this block can be skipped by a node acting in `roles`.
    pub fn is_ignorable(&self, roles: &HashSet<String>) -> bool {
        !self.must_understand || roles.is_empty() || !roles.contains(&self.role)
    }
}

/// The block must be one element subtree, closed by its last token.
fn check_balanced(content: &[Token], start: &StartElement) -> Result<(), SoapError> {
    let mut depth = 0usize;
    for (i, token) in content.iter().enumerate() {
        match token {
            Token::StartElement(_) => depth += 1,
            Token::EndElement(_) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    SoapError::InvalidEnvelope(format!("unbalanced end tag in header block {}", start.name()))
                })?;
                if depth == 0 && i + 1 != content.len() {
                    return Err(SoapError::InvalidEnvelope(format!(
                        "content after end of header block {}",
                        start.name()
                    )));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SoapError::InvalidEnvelope(format!("header block {} is not closed", start.name())));
    }
    Ok(())
}

fn text_block(start: StartElement, value: &str) -> Vec<Token> {
    let end = start.end();
    vec![
        Token::StartElement(start),
        Token::Text(value.to_string()),
        Token::EndElement(end),
    ]
}

/// Envelope-namespace attribute of a header block; 1.1 also accepts the
/// unqualified form.
fn envelope_attribute<'a>(version: SoapVersion, start: &'a StartElement, local: &str) -> Option<&'a str> {
    start
        .attributes
        .iter()
        .rev()
        .find(|a| {
            a.local_name == local
                && (a.namespace_uri == version.namespace()
                    || (version.accepts_unqualified_header_attributes() && a.namespace_uri.is_empty()))
        })
        .map(|a| a.value.as_str())
}

fn parse_bool(value: &str, attribute: &str) -> Result<bool, SoapError> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(SoapError::InvalidEnvelope(format!(
            "invalid value '{}' for header attribute {}",
            other, attribute
        ))),
    }
}

/// Roles a node plays: the version's required roles plus configured ones.
pub fn active_roles(version: SoapVersion, configured: &[String]) -> HashSet<String> {
    version
        .required_roles()
        .iter()
        .map(|r| r.to_string())
        .chain(configured.iter().cloned())
        .collect()
}

/// Ordered list of header blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderList {
    headers: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.headers.iter()
    }

    pub fn push(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// First block with this name.
    pub fn get(&self, name: &QName) -> Option<&Header> {
        self.headers.iter().find(|h| h.name() == name)
    }

    /// Remove every block with this name, returning how many were removed.
    pub fn remove(&mut self, name: &QName) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| h.name() != name);
        before - self.headers.len()
    }

    /// Names of mandatory blocks targeted at `roles` that are not in
    /// `understood`, in document order. All offenders are collected.
    pub fn not_understood(&self, roles: &HashSet<String>, understood: &HashSet<QName>) -> Vec<QName> {
        self.headers
            .iter()
            .filter(|h| !h.is_ignorable(roles) && !understood.contains(h.name()))
            .map(|h| h.name().clone())
            .collect()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

impl FromIterator<Header> for HeaderList {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{capture_subtree, StreamCursor, XmlCursor};
    use crate::version::{SOAP_11_ACTOR_NEXT, SOAP_11_NS, SOAP_12_NS, SOAP_12_ROLE_ULTIMATE_RECEIVER};

    fn header_from_xml(version: SoapVersion, xml: &str) -> Result<Header, SoapError> {
        let mut cursor = StreamCursor::from_bytes(xml.to_string());
        let start = match cursor.next_token().unwrap() {
            Some(Token::StartElement(s)) => s,
            other => panic!("unexpected {other:?}"),
        };
        let tokens = capture_subtree(&mut cursor, start).unwrap();
        Header::parse(version, tokens)
    }

    #[test]
    fn test_soap_12_attributes() {
        let xml = format!(
            r#"<t:Tx xmlns:t="urn:t" xmlns:env="{}" env:mustUnderstand="true" env:role="urn:r" env:relay="1" t:id="7">5</t:Tx>"#,
            SOAP_12_NS
        );
        let header = header_from_xml(SoapVersion::Soap12, &xml).unwrap();
        assert!(header.must_understand());
        assert_eq!(header.role(), "urn:r");
        assert!(header.is_relay());
        assert_eq!(header.attribute("urn:t", "id"), Some("7"));
        assert_eq!(header.string_value(), "5");
        assert_eq!(header.attributes().len(), 4);
    }

    #[test]
    fn test_unclosed_block_is_rejected() {
        let start = StartElement::new("urn:h", "H", "h").with_decl("h", "urn:h");
        let err = Header::parse(SoapVersion::Soap12, vec![Token::StartElement(start.clone())]).unwrap_err();
        assert!(matches!(err, SoapError::InvalidEnvelope(_)));

        let end = start.end();
        let trailing = vec![
            Token::StartElement(start.clone()),
            Token::EndElement(end.clone()),
            Token::EndElement(end),
        ];
        assert!(matches!(Header::parse(SoapVersion::Soap12, trailing), Err(SoapError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_soap_12_default_role() {
        let xml = r#"<t:Tx xmlns:t="urn:t">5</t:Tx>"#;
        let header = header_from_xml(SoapVersion::Soap12, xml).unwrap();
        assert!(!header.must_understand());
        assert_eq!(header.role(), SOAP_12_ROLE_ULTIMATE_RECEIVER);
    }

    #[test]
    fn test_soap_12_ignores_unqualified_must_understand() {
        let xml = r#"<t:Tx xmlns:t="urn:t" mustUnderstand="true"/>"#;
        let header = header_from_xml(SoapVersion::Soap12, xml).unwrap();
        assert!(!header.must_understand());
    }

    #[test]
    fn test_soap_11_actor_and_unqualified_forms() {
        let xml = format!(
            r#"<t:Tx xmlns:t="urn:t" xmlns:S="{}" S:mustUnderstand="1" S:actor="urn:a"/>"#,
            SOAP_11_NS
        );
        let header = header_from_xml(SoapVersion::Soap11, &xml).unwrap();
        assert!(header.must_understand());
        assert_eq!(header.role(), "urn:a");
        assert!(!header.is_relay());

        let bare = header_from_xml(SoapVersion::Soap11, r#"<t:Tx xmlns:t="urn:t" mustUnderstand="1"/>"#).unwrap();
        assert!(bare.must_understand());
        assert_eq!(bare.role(), SOAP_11_ACTOR_NEXT);
    }

    #[test]
    fn test_invalid_must_understand_value() {
        let xml = format!(r#"<t:Tx xmlns:t="urn:t" xmlns:env="{}" env:mustUnderstand="maybe"/>"#, SOAP_12_NS);
        assert!(matches!(
            header_from_xml(SoapVersion::Soap12, &xml),
            Err(SoapError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_duplicate_attributes_last_wins() {
        let header = Header::text_with_attributes(
            SoapVersion::Soap11,
            QName::new("urn:t", "Tx"),
            "t",
            "v",
            vec![
                Attribute::new("urn:x", "id", "x", "first"),
                Attribute::new("urn:x", "id", "x", "second"),
                Attribute::new(SOAP_11_NS, "actor", "S", "urn:one"),
                Attribute::new(SOAP_11_NS, "actor", "S", "urn:two"),
            ],
        )
        .unwrap();
        assert_eq!(header.attribute("urn:x", "id"), Some("second"));
        assert_eq!(header.role(), "urn:two");
    }

    #[test]
    fn test_is_ignorable() {
        let roles = active_roles(SoapVersion::Soap12, &["urn:mine".to_string()]);
        let mandatory = Header::text_with_attributes(
            SoapVersion::Soap12,
            QName::new("urn:t", "Tx"),
            "t",
            "v",
            vec![Attribute::new(SOAP_12_NS, "mustUnderstand", "env", "true")],
        )
        .unwrap();
        assert!(!mandatory.is_ignorable(&roles));
        assert!(mandatory.is_ignorable(&HashSet::new()));

        let elsewhere = Header::text_with_attributes(
            SoapVersion::Soap12,
            QName::new("urn:t", "Tx"),
            "t",
            "v",
            vec![
                Attribute::new(SOAP_12_NS, "mustUnderstand", "env", "true"),
                Attribute::new(SOAP_12_NS, "role", "env", "urn:someone-else"),
            ],
        )
        .unwrap();
        assert!(elsewhere.is_ignorable(&roles));
    }

    #[test]
    fn test_header_list_collects_every_offender() {
        let must = |local: &str| {
            Header::text_with_attributes(
                SoapVersion::Soap12,
                QName::new("urn:t", local),
                "t",
                "v",
                vec![Attribute::new(SOAP_12_NS, "mustUnderstand", "env", "true")],
            )
            .unwrap()
        };
        let list: HeaderList = vec![must("A"), must("B"), must("C")].into_iter().collect();
        let understood: HashSet<QName> = [QName::new("urn:t", "B")].into_iter().collect();
        let roles = active_roles(SoapVersion::Soap12, &[]);
        assert_eq!(
            list.not_understood(&roles, &understood),
            vec![QName::new("urn:t", "A"), QName::new("urn:t", "C")]
        );
    }

    #[test]
    fn test_header_list_remove() {
        let mut list = HeaderList::new();
        list.push(Header::text(SoapVersion::Soap11, QName::new("urn:t", "A"), "t", "1").unwrap());
        list.push(Header::text(SoapVersion::Soap11, QName::new("urn:t", "A"), "t", "2").unwrap());
        assert_eq!(list.get(&QName::new("urn:t", "A")).unwrap().string_value(), "1");
        assert_eq!(list.remove(&QName::new("urn:t", "A")), 2);
        assert!(list.is_empty());
    }
}
