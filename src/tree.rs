//! In-memory element tree used for the envelope/header part of a message.
//!
//! Headers are small, so the envelope framing and header blocks are held as
//! a tree; only the body payload stays in streaming form. [`SoapDocument`]
//! is that tree with its Envelope, Header and Body nodes tracked by id.

use crate::cursor::{NamespaceDecl, NamespaceScope, StartElement, Token, XmlCursor};
use crate::error::SoapError;
use crate::header::{Header, HeaderList};
use crate::message::Message;
use crate::tag::TagInfoset;
use crate::version::{SoapVersion, XML_NS};
use crate::writer::tokens_to_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(StartElement),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena of nodes. Ids are stable for the lifetime of the document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        id
    }

    /// Append a node as the last child of `parent` (or as a detached root).
    pub fn append(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = self.push(kind, parent);
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    /// Insert a node into `parent` right before `reference`.
    pub fn insert_before(&mut self, parent: NodeId, reference: NodeId, kind: NodeKind) -> NodeId {
        let id = self.push(kind, Some(parent));
        let children = &mut self.nodes[parent.0].children;
        let index = children.iter().position(|c| *c == reference).unwrap_or(children.len());
        children.insert(index, id);
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&StartElement> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut StartElement> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Element children only.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| matches!(self.kind(*c), NodeKind::Element(_)))
    }

    /// Namespace bound to `prefix` at `node`, walking up the ancestors.
    pub fn lookup_namespace(&self, node: Option<NodeId>, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(XML_NS.to_string());
        }
        let mut cursor = node;
        while let Some(id) = cursor {
            if let Some(element) = self.element(id) {
                if let Some(decl) = element.namespace_decls.iter().rev().find(|d| d.prefix == prefix) {
                    return Some(decl.uri.clone());
                }
            }
            cursor = self.parent(id);
        }
        None
    }

    /// Append a token sequence as children of `parent`.
    pub fn append_tokens(&mut self, parent: NodeId, tokens: &[Token]) -> Result<(), SoapError> {
        let mut stack = vec![parent];
        for token in tokens {
            let current = *stack
                .last()
                .ok_or_else(|| SoapError::XmlParse("unbalanced end tag".to_string()))?;
            match token {
                Token::StartElement(start) => {
                    let id = self.append(Some(current), NodeKind::Element(start.clone()));
                    stack.push(id);
                }
                Token::EndElement(_) => {
                    if stack.len() == 1 {
                        return Err(SoapError::XmlParse("unbalanced end tag".to_string()));
                    }
                    stack.pop();
                }
                Token::Text(text) => {
                    self.append(Some(current), NodeKind::Text(text.clone()));
                }
                Token::CData(text) => {
                    self.append(Some(current), NodeKind::CData(text.clone()));
                }
                Token::Comment(text) => {
                    self.append(Some(current), NodeKind::Comment(text.clone()));
                }
            }
        }
        if stack.len() != 1 {
            return Err(SoapError::XmlParse("unclosed element in token sequence".to_string()));
        }
        Ok(())
    }

    /// Tokens of the subtree rooted at `id`, the node itself included.
    pub fn subtree_tokens(&self, id: NodeId) -> Vec<Token> {
        let mut out = Vec::new();
        self.collect_subtree(id, &mut out);
        out
    }

    fn collect_subtree(&self, id: NodeId, out: &mut Vec<Token>) {
        match self.kind(id) {
            NodeKind::Element(start) => {
                out.push(Token::StartElement(start.clone()));
                for child in self.children(id) {
                    self.collect_subtree(*child, out);
                }
                out.push(Token::EndElement(start.end()));
            }
            NodeKind::Text(text) => out.push(Token::Text(text.clone())),
            NodeKind::CData(text) => out.push(Token::CData(text.clone())),
            NodeKind::Comment(text) => out.push(Token::Comment(text.clone())),
        }
    }
}

/// Depth-first cursor over an owned document subtree.
pub struct TreeCursor {
    document: Document,
    root: NodeId,
    stack: Vec<(NodeId, usize)>,
    started: bool,
    scope: NamespaceScope,
    pop_pending: bool,
    last_node: Option<NodeId>,
}

impl TreeCursor {
    pub fn new(document: Document, root: NodeId, inherited: Vec<NamespaceDecl>) -> Self {
        Self {
            document,
            root,
            stack: Vec::new(),
            started: false,
            scope: NamespaceScope::with_base(inherited),
            pop_pending: false,
            last_node: None,
        }
    }

    /// Node behind the token most recently returned.
    pub fn last_node(&self) -> Option<NodeId> {
        self.last_node
    }
}

impl XmlCursor for TreeCursor {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        if self.pop_pending {
            self.scope.pop();
            self.pop_pending = false;
        }

        let next = if !self.started {
            self.started = true;
            Some(self.root)
        } else {
            match self.stack.last_mut() {
                None => None,
                Some((node, index)) => {
                    let children = &self.document.nodes[node.0].children;
                    if *index < children.len() {
                        let child = children[*index];
                        *index += 1;
                        Some(child)
                    } else {
                        let closed = *node;
                        self.stack.pop();
                        self.pop_pending = true;
                        self.last_node = Some(closed);
                        let end = match self.document.kind(closed) {
                            NodeKind::Element(start) => start.end(),
                            _ => return Err(SoapError::XmlParse("non-element on tree stack".to_string())),
                        };
                        return Ok(Some(Token::EndElement(end)));
                    }
                }
            }
        };

        let Some(id) = next else {
            self.last_node = None;
            return Ok(None);
        };
        self.last_node = Some(id);
        let token = match self.document.kind(id) {
            NodeKind::Element(start) => {
                self.scope.push(start.namespace_decls.clone());
                self.stack.push((id, 0));
                Token::StartElement(start.clone())
            }
            NodeKind::Text(text) => Token::Text(text.clone()),
            NodeKind::CData(text) => Token::CData(text.clone()),
            NodeKind::Comment(text) => Token::Comment(text.clone()),
        };
        Ok(Some(token))
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        &self.scope
    }
}

/// A SOAP envelope as a tree with pre-existing Envelope and Body nodes and
/// an optional Header node.
#[derive(Debug, Clone)]
pub struct SoapDocument {
    version: SoapVersion,
    document: Document,
    envelope: NodeId,
    header: Option<NodeId>,
    body: NodeId,
}

impl SoapDocument {
    /// Empty envelope with the version's default prefix.
    pub fn new(version: SoapVersion) -> Self {
        let prefix = version.default_prefix();
        let envelope_tag = TagInfoset::synthesized(version.namespace(), "Envelope", prefix, true);
        let body_tag = TagInfoset::synthesized(version.namespace(), "Body", prefix, false);
        Self::framing(version, &envelope_tag, None, false, &body_tag)
    }

    /// Tree for replaying a message's framing. The Header node exists only
    /// when there is at least one header block.
    pub fn from_parts(
        version: SoapVersion,
        envelope_tag: &TagInfoset,
        header_tag: Option<&TagInfoset>,
        headers: &HeaderList,
        body_tag: &TagInfoset,
    ) -> Result<Self, SoapError> {
        let mut soap = Self::framing(version, envelope_tag, header_tag, !headers.is_empty(), body_tag);
        if let Some(header_id) = soap.header {
            for block in headers {
                soap.document.append_tokens(header_id, block.tokens())?;
            }
        }
        Ok(soap)
    }

    fn framing(
        version: SoapVersion,
        envelope_tag: &TagInfoset,
        header_tag: Option<&TagInfoset>,
        with_header: bool,
        body_tag: &TagInfoset,
    ) -> Self {
        let mut document = Document::new();
        let envelope = document.append(None, NodeKind::Element(envelope_tag.to_start()));
        let header = with_header.then(|| {
            let tag = header_tag
                .cloned()
                .unwrap_or_else(|| TagInfoset::synthesized(version.namespace(), "Header", envelope_tag.prefix(), false));
            document.append(Some(envelope), NodeKind::Element(tag.to_start()))
        });
        let body = document.append(Some(envelope), NodeKind::Element(body_tag.to_start()));
        Self {
            version,
            document,
            envelope,
            header,
            body,
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn envelope(&self) -> NodeId {
        self.envelope
    }

    pub fn header(&self) -> Option<NodeId> {
        self.header
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Header node, created before Body if missing.
    pub fn ensure_header(&mut self) -> NodeId {
        if let Some(header) = self.header {
            return header;
        }
        let prefix = self
            .document
            .element(self.envelope)
            .map(|e| e.prefix.clone())
            .unwrap_or_default();
        let tag = TagInfoset::synthesized(self.version.namespace(), "Header", &prefix, false);
        let id = self
            .document
            .insert_before(self.envelope, self.body, NodeKind::Element(tag.to_start()));
        self.header = Some(id);
        id
    }

    /// Pre-existing part an element named `{namespace_uri}local_name` opened
    /// under `parent` stands for, if any.
    pub fn soap_part(&mut self, parent: Option<NodeId>, namespace_uri: &str, local_name: &str) -> Option<NodeId> {
        if namespace_uri != self.version.namespace() {
            return None;
        }
        match (parent, local_name) {
            (None, "Envelope") => Some(self.envelope),
            (Some(p), "Header") if p == self.envelope => Some(self.ensure_header()),
            (Some(p), "Body") if p == self.envelope => Some(self.body),
            _ => None,
        }
    }

    /// Whether `id` is the Envelope, Header or Body node.
    pub fn is_soap_part(&self, id: NodeId) -> bool {
        id == self.envelope || id == self.body || Some(id) == self.header
    }

    /// Make sure the prefixes of Envelope/Header/Body resolve to the SOAP
    /// namespace, declaring them where needed.
    pub(crate) fn repair_part_prefixes(&mut self) {
        let ns = self.version.namespace();
        let parts: Vec<NodeId> = [Some(self.envelope), self.header, Some(self.body)]
            .into_iter()
            .flatten()
            .collect();
        for id in parts {
            let Some(prefix) = self.document.element(id).map(|e| e.prefix.clone()) else {
                continue;
            };
            if self.document.lookup_namespace(Some(id), &prefix).as_deref() != Some(ns) {
                if let Some(element) = self.document.element_mut(id) {
                    element.namespace_decls.push(NamespaceDecl::new(prefix, ns));
                }
            }
        }
    }

    /// Depth-first cursor over the whole envelope.
    pub fn into_cursor(self) -> TreeCursor {
        TreeCursor::new(self.document, self.envelope, Vec::new())
    }

    pub fn to_tokens(&self) -> Vec<Token> {
        self.document.subtree_tokens(self.envelope)
    }

    pub fn to_xml_string(&self) -> Result<String, SoapError> {
        tokens_to_string(&self.to_tokens())
    }

    /// Turn the tree back into a message with a buffered payload.
    pub fn into_message(self) -> Result<Message, SoapError> {
        let tag = |id: NodeId| -> Result<TagInfoset, SoapError> {
            self.document
                .element(id)
                .map(TagInfoset::from)
                .ok_or_else(|| SoapError::InvalidEnvelope("SOAP part is not an element".to_string()))
        };
        let envelope_tag = tag(self.envelope)?;
        let body_tag = tag(self.body)?;
        let header_tag = match self.header {
            Some(id) => Some(tag(id)?),
            None => None,
        };

        let mut headers = HeaderList::new();
        if let Some(header) = self.header {
            for block in self.document.child_elements(header) {
                headers.push(Header::parse(self.version, self.document.subtree_tokens(block))?);
            }
        }

        let mut payload = Vec::new();
        for child in self.document.children(self.body) {
            match self.document.kind(*child) {
                NodeKind::Element(_) => payload.extend(self.document.subtree_tokens(*child)),
                NodeKind::Text(text) if !text.trim().is_empty() => payload.push(Token::Text(text.clone())),
                NodeKind::CData(text) => payload.push(Token::CData(text.clone())),
                _ => {}
            }
        }

        Ok(Message::from_buffered_parts(
            self.version,
            envelope_tag,
            header_tag,
            headers,
            body_tag,
            payload,
        ))
    }
}
