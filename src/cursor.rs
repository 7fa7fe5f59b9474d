//! Forward-only XML token cursors.
//!
//! Every component of the codec consumes XML through [`XmlCursor`]. Two
//! implementations live here: [`StreamCursor`] pulls tokens straight off a
//! byte stream through quick-xml, and [`BufferedCursor`] replays tokens that
//! were captured earlier (copies, header blocks, binary XML).
//!
//! quick-xml hands out raw qualified names; prefix resolution happens here so
//! that any cursor can report the bindings in scope at the token it last
//! returned.

use crate::error::SoapError;
use crate::tag::QName;
use crate::version::XML_NS;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

/// A prefix binding. An empty prefix is the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct NamespaceDecl {
    pub prefix: String,
    pub uri: String,
}

impl NamespaceDecl {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// A non-namespace attribute with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Attribute {
    pub namespace_uri: String,
    pub local_name: String,
    pub prefix: String,
    pub value: String,
}

impl Attribute {
    pub fn new(
        namespace_uri: impl Into<String>,
        local_name: impl Into<String>,
        prefix: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            local_name: local_name.into(),
            prefix: prefix.into(),
            value: value.into(),
        }
    }

    /// Unqualified attribute.
    pub fn local(local_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new("", local_name, "", value)
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.prefix, &self.local_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StartElement {
    pub namespace_uri: String,
    pub local_name: String,
    pub prefix: String,
    pub namespace_decls: Vec<NamespaceDecl>,
    pub attributes: Vec<Attribute>,
}

impl StartElement {
    pub fn new(namespace_uri: impl Into<String>, local_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            local_name: local_name.into(),
            prefix: prefix.into(),
            namespace_decls: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn with_decl(mut self, prefix: &str, uri: &str) -> Self {
        self.namespace_decls.push(NamespaceDecl::new(prefix, uri));
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn name(&self) -> QName {
        QName::new(&self.namespace_uri, &self.local_name)
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.prefix, &self.local_name)
    }

    /// Matching end tag.
    pub fn end(&self) -> EndElement {
        EndElement {
            namespace_uri: self.namespace_uri.clone(),
            local_name: self.local_name.clone(),
            prefix: self.prefix.clone(),
        }
    }

    /// Last attribute with this name; duplicates resolve last-wins.
    pub fn attribute(&self, namespace_uri: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|a| a.namespace_uri == namespace_uri && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn is(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.namespace_uri == namespace_uri && self.local_name == local_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EndElement {
    pub namespace_uri: String,
    pub local_name: String,
    pub prefix: String,
}

impl EndElement {
    pub fn name(&self) -> QName {
        QName::new(&self.namespace_uri, &self.local_name)
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.prefix, &self.local_name)
    }
}

/// One XML infoset item as seen by a cursor.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum Token {
    StartElement(StartElement),
    EndElement(EndElement),
    Text(String),
    CData(String),
    Comment(String),
}

impl Token {
    /// Text or comment that carries no content for the envelope structure.
    pub fn is_ignorable(&self) -> bool {
        match self {
            Token::Text(text) => text.chars().all(char::is_whitespace),
            Token::Comment(_) => true,
            _ => false,
        }
    }
}

pub(crate) fn qualify(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

fn split_qualified(raw: &str) -> (&str, &str) {
    raw.split_once(':').unwrap_or(("", raw))
}

/// Stack of namespace frames, one per open element.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Vec<NamespaceDecl>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope seeded with bindings inherited from outside the replayed tokens.
    pub fn with_base(decls: Vec<NamespaceDecl>) -> Self {
        Self { frames: vec![decls] }
    }

    pub fn push(&mut self, decls: Vec<NamespaceDecl>) {
        self.frames.push(decls);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Namespace bound to `prefix`. `xmlns=""` resolves to an empty string.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NS);
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|decl| decl.prefix == prefix)
            .map(|decl| decl.uri.as_str())
    }

    /// Some prefix currently bound to `uri`, respecting shadowing.
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|decl| decl.uri == uri && self.resolve(&decl.prefix) == Some(uri))
            .map(|decl| decl.prefix.as_str())
    }

    /// Flattened bindings; inner declarations shadow outer ones.
    pub fn in_scope(&self) -> Vec<NamespaceDecl> {
        let mut merged: Vec<NamespaceDecl> = Vec::new();
        for decl in self.frames.iter().flatten() {
            merged.retain(|existing| existing.prefix != decl.prefix);
            merged.push(decl.clone());
        }
        merged
    }
}

/// Forward-only pull cursor over XML tokens.
pub trait XmlCursor {
    /// Next token, or `None` once the cursor is exhausted.
    fn next_token(&mut self) -> Result<Option<Token>, SoapError>;

    /// Bindings in scope at the token most recently returned.
    fn namespace_scope(&self) -> &NamespaceScope;
}

impl<C: XmlCursor + ?Sized> XmlCursor for Box<C> {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        (**self).next_token()
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        (**self).namespace_scope()
    }
}

/// Owned result of one quick-xml event, so the read buffer can be reused.
enum Step {
    Start(StartElement, bool),
    End,
    Token(Token),
    Skip,
    Eof,
}

/// Cursor over a live byte stream.
pub struct StreamCursor<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    scope: NamespaceScope,
    open: Vec<EndElement>,
    queued_end: bool,
    pop_pending: bool,
    finished: bool,
}

impl<R: BufRead> StreamCursor<R> {
    pub fn new(input: R) -> Self {
        let mut reader = Reader::from_reader(input);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            scope: NamespaceScope::new(),
            open: Vec::new(),
            queued_end: false,
            pop_pending: false,
            finished: false,
        }
    }

    fn close_element(&mut self) -> Result<Token, SoapError> {
        let end = self
            .open
            .pop()
            .ok_or_else(|| SoapError::XmlParse("unexpected end tag".to_string()))?;
        self.pop_pending = true;
        Ok(Token::EndElement(end))
    }

    fn read_step(&mut self) -> Result<Step, SoapError> {
        self.buf.clear();
        let at_top_level = self.open.is_empty();
        let step = match self.reader.read_event_into(&mut self.buf)? {
            Event::Start(e) => Step::Start(resolve_start(&mut self.scope, &e)?, false),
            Event::Empty(e) => Step::Start(resolve_start(&mut self.scope, &e)?, true),
            Event::End(_) => Step::End,
            Event::Text(_) if at_top_level => Step::Skip,
            Event::Text(e) => Step::Token(Token::Text(e.unescape()?.into_owned())),
            Event::CData(e) => Step::Token(Token::CData(utf8(&e)?.to_string())),
            Event::Comment(_) if at_top_level => Step::Skip,
            Event::Comment(e) => Step::Token(Token::Comment(utf8(&e)?.to_string())),
            Event::DocType(_) => {
                return Err(SoapError::XmlParse(
                    "DOCTYPE declarations are not allowed in SOAP messages".to_string(),
                ))
            }
            Event::Eof => Step::Eof,
            _ => Step::Skip,
        };
        Ok(step)
    }
}

impl<R: Read> StreamCursor<BufReader<R>> {
    pub fn from_read(input: R) -> Self {
        Self::new(BufReader::new(input))
    }
}

impl StreamCursor<std::io::Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }
}

impl<R: BufRead> XmlCursor for StreamCursor<R> {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        if self.pop_pending {
            self.scope.pop();
            self.pop_pending = false;
        }
        if self.queued_end {
            self.queued_end = false;
            return self.close_element().map(Some);
        }
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.read_step()? {
                Step::Start(start, empty) => {
                    self.open.push(start.end());
                    self.queued_end = empty;
                    return Ok(Some(Token::StartElement(start)));
                }
                Step::End => return self.close_element().map(Some),
                Step::Token(token) => return Ok(Some(token)),
                Step::Skip => continue,
                Step::Eof => {
                    self.finished = true;
                    if let Some(unclosed) = self.open.last() {
                        return Err(SoapError::XmlParse(format!(
                            "unexpected end of document inside <{}>",
                            unclosed.qualified_name()
                        )));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        &self.scope
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, SoapError> {
    std::str::from_utf8(bytes).map_err(|e| SoapError::XmlParse(format!("Invalid UTF-8: {}", e)))
}

/// Build a resolved start element and push its namespace frame.
fn resolve_start(scope: &mut NamespaceScope, e: &BytesStart) -> Result<StartElement, SoapError> {
    let raw_name = utf8(e.name().as_ref())?.to_string();
    let mut namespace_decls = Vec::new();
    let mut raw_attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|err| SoapError::XmlParse(err.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            namespace_decls.push(NamespaceDecl::new("", value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_decls.push(NamespaceDecl::new(prefix, value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    scope.push(namespace_decls.clone());

    let (prefix, local_name) = split_qualified(&raw_name);
    let namespace_uri = match prefix {
        "" => scope.resolve("").unwrap_or("").to_string(),
        p => scope
            .resolve(p)
            .ok_or_else(|| SoapError::XmlParse(format!("unbound namespace prefix '{}' on <{}>", p, raw_name)))?
            .to_string(),
    };

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attr_prefix, attr_local) = split_qualified(&key);
        // Unprefixed attributes are in no namespace.
        let attr_ns = match attr_prefix {
            "" => String::new(),
            p => scope
                .resolve(p)
                .ok_or_else(|| SoapError::XmlParse(format!("unbound namespace prefix '{}' on attribute {}", p, key)))?
                .to_string(),
        };
        attributes.push(Attribute::new(attr_ns, attr_local, attr_prefix, value));
    }

    Ok(StartElement {
        namespace_uri,
        local_name: local_name.to_string(),
        prefix: prefix.to_string(),
        namespace_decls,
        attributes,
    })
}

/// Replay cursor over captured tokens.
#[derive(Debug, Clone)]
pub struct BufferedCursor {
    tokens: Arc<[Token]>,
    position: usize,
    scope: NamespaceScope,
    pop_pending: bool,
}

impl BufferedCursor {
    /// `inherited` are the bindings in scope around the first token.
    pub fn new(tokens: Arc<[Token]>, inherited: Vec<NamespaceDecl>) -> Self {
        Self {
            tokens,
            position: 0,
            scope: NamespaceScope::with_base(inherited),
            pop_pending: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()), Vec::new())
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.position)
    }
}

impl XmlCursor for BufferedCursor {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        if self.pop_pending {
            self.scope.pop();
            self.pop_pending = false;
        }
        let Some(token) = self.tokens.get(self.position).cloned() else {
            return Ok(None);
        };
        self.position += 1;
        match &token {
            Token::StartElement(start) => self.scope.push(start.namespace_decls.clone()),
            Token::EndElement(_) => self.pop_pending = true,
            _ => {}
        }
        Ok(Some(token))
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        &self.scope
    }
}

/// Drain a cursor into a vector.
pub fn collect_tokens(cursor: &mut dyn XmlCursor) -> Result<Vec<Token>, SoapError> {
    let mut tokens = Vec::new();
    while let Some(token) = cursor.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

/// Capture the subtree opened by `start` (already read) up to its end tag.
pub fn capture_subtree(cursor: &mut dyn XmlCursor, start: StartElement) -> Result<Vec<Token>, SoapError> {
    let mut tokens = vec![Token::StartElement(start)];
    let mut depth = 1usize;
    while depth > 0 {
        let token = cursor
            .next_token()?
            .ok_or_else(|| SoapError::XmlParse("unexpected end of document".to_string()))?;
        match &token {
            Token::StartElement(_) => depth += 1,
            Token::EndElement(_) => depth -= 1,
            _ => {}
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Next token that is not whitespace or a comment.
pub fn next_significant(cursor: &mut dyn XmlCursor) -> Result<Option<Token>, SoapError> {
    while let Some(token) = cursor.next_token()? {
        if !token.is_ignorable() {
            return Ok(Some(token));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::StartElement(s) => Some(s.name().to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stream_cursor_resolves_prefixes() {
        let xml = r#"<?xml version="1.0"?>
<a:root xmlns:a="urn:a" xmlns="urn:default"><child b:attr="1" plain="2" xmlns:b="urn:b"/></a:root>"#;
        let mut cursor = StreamCursor::from_bytes(xml);
        let tokens = collect_tokens(&mut cursor).unwrap();
        assert_eq!(starts(&tokens), vec!["{urn:a}root", "{urn:default}child"]);

        let child = tokens
            .iter()
            .find_map(|t| match t {
                Token::StartElement(s) if s.local_name == "child" => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(child.attribute("urn:b", "attr"), Some("1"));
        assert_eq!(child.attribute("", "plain"), Some("2"));
        // Empty element is expanded into start + end
        assert!(matches!(&tokens[2], Token::EndElement(e) if e.local_name == "child"));
    }

    #[test]
    fn test_stream_cursor_rejects_unbound_prefix() {
        let mut cursor = StreamCursor::from_bytes("<x:root/>");
        assert!(matches!(cursor.next_token(), Err(SoapError::XmlParse(_))));
    }

    #[test]
    fn test_stream_cursor_rejects_doctype() {
        let xml = r#"<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><root/>"#;
        let mut cursor = StreamCursor::from_bytes(xml);
        let err = collect_tokens(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("DOCTYPE"));
    }

    #[test]
    fn test_stream_cursor_detects_truncation() {
        let mut cursor = StreamCursor::from_bytes("<root><open>");
        assert!(collect_tokens(&mut cursor).is_err());
    }

    #[test]
    fn test_scope_tracks_end_tags() {
        let xml = r#"<r xmlns:p="urn:p"><p:x xmlns:q="urn:q"/></r>"#;
        let mut cursor = StreamCursor::from_bytes(xml);
        cursor.next_token().unwrap(); // <r>
        cursor.next_token().unwrap(); // <p:x>
        assert_eq!(cursor.namespace_scope().resolve("q"), Some("urn:q"));
        cursor.next_token().unwrap(); // </p:x>
        assert_eq!(cursor.namespace_scope().resolve("q"), Some("urn:q"));
        cursor.next_token().unwrap(); // </r>
        assert_eq!(cursor.namespace_scope().resolve("q"), None);
        assert_eq!(cursor.namespace_scope().resolve("p"), Some("urn:p"));
    }

    #[test]
    fn test_buffered_cursor_replays_with_inherited_scope() {
        let tokens: Arc<[Token]> = Arc::from(vec![
            Token::StartElement(StartElement::new("urn:p", "x", "p")),
            Token::Text("hi".to_string()),
            Token::EndElement(StartElement::new("urn:p", "x", "p").end()),
        ]);
        let mut cursor = BufferedCursor::new(tokens, vec![NamespaceDecl::new("p", "urn:p")]);
        assert_eq!(cursor.remaining(), 3);
        cursor.next_token().unwrap();
        assert_eq!(cursor.namespace_scope().resolve("p"), Some("urn:p"));
        assert_eq!(cursor.next_token().unwrap(), Some(Token::Text("hi".to_string())));
        cursor.next_token().unwrap();
        assert_eq!(cursor.next_token().unwrap(), None);
    }

    #[test]
    fn test_in_scope_shadowing() {
        let mut scope = NamespaceScope::with_base(vec![NamespaceDecl::new("a", "urn:outer")]);
        scope.push(vec![NamespaceDecl::new("a", "urn:inner"), NamespaceDecl::new("b", "urn:b")]);
        let merged = scope.in_scope();
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&NamespaceDecl::new("a", "urn:inner")));
        assert_eq!(scope.prefix_for("urn:outer"), None);
        assert_eq!(scope.prefix_for("urn:b"), Some("b"));
    }
}
