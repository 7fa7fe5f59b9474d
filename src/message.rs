//! The SOAP message model.
//!
//! A [`Message`] keeps its header blocks and envelope framing in memory while
//! the body payload stays streamable. The payload can be read exactly once,
//! through a cursor or by writing the message out. [`Message::copy`] buffers
//! the payload so that both the original and the copy stay readable.

use crate::attachment::AttachmentSet;
use crate::cursor::{collect_tokens, BufferedCursor, NamespaceDecl, StartElement, StreamCursor, Token, XmlCursor};
use crate::deferred::DeferredElementWriter;
use crate::error::SoapError;
use crate::fault::SoapFault;
use crate::header::{Header, HeaderList};
use crate::hybrid::HybridReader;
use crate::tag::{QName, TagInfoset};
use crate::tree::SoapDocument;
use crate::version::SoapVersion;
use crate::writer::{pipe, tokens_to_string, TokenSink};
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Buffered payload tokens plus the bindings they were read under.
#[derive(Debug, Clone)]
struct PayloadBuffer {
    tokens: Arc<[Token]>,
    inherited: Vec<NamespaceDecl>,
}

impl PayloadBuffer {
    fn cursor(&self) -> BufferedCursor {
        BufferedCursor::new(Arc::clone(&self.tokens), self.inherited.clone())
    }
}

enum PayloadState {
    /// Payload still on the wire, cursor positioned at its first element.
    Streaming(Box<dyn XmlCursor>),
    Buffered(PayloadBuffer),
    Consumed,
}

impl fmt::Debug for PayloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming(_) => f.write_str("Streaming"),
            Self::Buffered(buffer) => write!(f, "Buffered({} tokens)", buffer.tokens.len()),
            Self::Consumed => f.write_str("Consumed"),
        }
    }
}

/// A SOAP message.
#[derive(Debug)]
pub struct Message {
    version: SoapVersion,
    envelope_tag: TagInfoset,
    header_tag: Option<TagInfoset>,
    body_tag: TagInfoset,
    /// Raw header blocks not parsed yet
    pending_headers: Option<Vec<Arc<[Token]>>>,
    headers: HeaderList,
    attachments: AttachmentSet,
    payload_name: Option<QName>,
    payload: PayloadState,
    consumed_at: Option<String>,
}

impl Message {
    /// Message around a payload that is still being streamed. `cursor` must
    /// return the payload element and then `None` at the Body end tag.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stream(
        version: SoapVersion,
        envelope_tag: TagInfoset,
        header_tag: Option<TagInfoset>,
        header_blocks: Vec<Arc<[Token]>>,
        body_tag: TagInfoset,
        payload_name: Option<QName>,
        cursor: Box<dyn XmlCursor>,
        attachments: AttachmentSet,
    ) -> Self {
        let payload = match payload_name {
            Some(_) => PayloadState::Streaming(cursor),
            None => PayloadState::Buffered(PayloadBuffer {
                tokens: Arc::from(Vec::new()),
                inherited: Vec::new(),
            }),
        };
        Self {
            version,
            envelope_tag,
            header_tag,
            body_tag,
            pending_headers: Some(header_blocks),
            headers: HeaderList::new(),
            attachments,
            payload_name,
            payload,
            consumed_at: None,
        }
    }

    pub(crate) fn from_buffered_parts(
        version: SoapVersion,
        envelope_tag: TagInfoset,
        header_tag: Option<TagInfoset>,
        headers: HeaderList,
        body_tag: TagInfoset,
        payload: Vec<Token>,
    ) -> Self {
        let payload_name = payload.iter().find_map(|t| match t {
            Token::StartElement(start) => Some(start.name()),
            _ => None,
        });
        let inherited = merge_decls(envelope_tag.namespace_decls(), body_tag.namespace_decls());
        Self {
            version,
            envelope_tag,
            header_tag,
            body_tag,
            pending_headers: None,
            headers,
            attachments: AttachmentSet::new(),
            payload_name,
            payload: PayloadState::Buffered(PayloadBuffer {
                tokens: Arc::from(payload),
                inherited,
            }),
            consumed_at: None,
        }
    }

    /// New message with the version's default framing around `payload`.
    pub fn from_payload(version: SoapVersion, payload: Vec<Token>) -> Self {
        let prefix = version.default_prefix();
        Self::from_buffered_parts(
            version,
            TagInfoset::synthesized(version.namespace(), "Envelope", prefix, true),
            None,
            HeaderList::new(),
            TagInfoset::synthesized(version.namespace(), "Body", prefix, false),
            payload,
        )
    }

    /// Like [`Message::from_payload`] with the payload given as XML text.
    pub fn from_payload_xml(version: SoapVersion, xml: &str) -> Result<Self, SoapError> {
        let mut cursor = StreamCursor::from_bytes(xml);
        let tokens = collect_tokens(&mut cursor)?;
        Ok(Self::from_payload(version, tokens))
    }

    /// Message with an empty Body.
    pub fn empty(version: SoapVersion) -> Self {
        Self::from_payload(version, Vec::new())
    }

    /// Fault message. For 1.2 MustUnderstand faults the offending headers
    /// are listed as `NotUnderstood` header blocks.
    pub fn from_fault(version: SoapVersion, fault: &SoapFault) -> Result<Self, SoapError> {
        let prefix = version.default_prefix();
        let mut message = Self::from_payload(version, fault.to_tokens(version, prefix));
        for header in fault.not_understood_headers(version, prefix)? {
            message.headers.push(header);
        }
        Ok(message)
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn envelope_tag(&self) -> &TagInfoset {
        &self.envelope_tag
    }

    pub fn header_tag(&self) -> Option<&TagInfoset> {
        self.header_tag.as_ref()
    }

    pub fn body_tag(&self) -> &TagInfoset {
        &self.body_tag
    }

    pub fn has_payload(&self) -> bool {
        self.payload_name.is_some()
    }

    pub fn payload_name(&self) -> Option<&QName> {
        self.payload_name.as_ref()
    }

    pub fn payload_local_name(&self) -> Option<&str> {
        self.payload_name.as_ref().map(|n| n.local.as_str())
    }

    pub fn payload_namespace_uri(&self) -> Option<&str> {
        self.payload_name.as_ref().map(|n| n.namespace.as_str())
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Whether any header block is present, without parsing them.
    pub fn has_headers(&self) -> bool {
        match &self.pending_headers {
            Some(blocks) => !blocks.is_empty() || !self.headers.is_empty(),
            None => !self.headers.is_empty(),
        }
    }

    /// Header blocks, parsed on first access.
    pub fn headers(&mut self) -> Result<&HeaderList, SoapError> {
        self.parse_headers()?;
        Ok(&self.headers)
    }

    pub fn headers_mut(&mut self) -> Result<&mut HeaderList, SoapError> {
        self.parse_headers()?;
        Ok(&mut self.headers)
    }

    pub fn add_header(&mut self, header: Header) -> Result<(), SoapError> {
        self.headers_mut()?.push(header);
        Ok(())
    }

    fn parse_headers(&mut self) -> Result<(), SoapError> {
        if let Some(blocks) = &self.pending_headers {
            let parsed = blocks
                .iter()
                .map(|block| Header::parse(self.version, Arc::clone(block)))
                .collect::<Result<HeaderList, _>>()?;
            trace!(count = parsed.len(), "Parsed header blocks");
            self.headers = parsed;
            self.pending_headers = None;
        }
        Ok(())
    }

    pub fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    pub fn with_attachments(mut self, attachments: AttachmentSet) -> Self {
        self.attachments = attachments;
        self
    }

    /// Bindings in scope inside the Body; Body declarations shadow the
    /// Envelope's.
    pub fn body_namespaces(&self) -> Vec<NamespaceDecl> {
        merge_decls(self.envelope_tag.namespace_decls(), self.body_tag.namespace_decls())
    }

    fn mark_consumed(&mut self) {
        self.consumed_at = Some(Backtrace::capture().to_string());
    }

    fn already_consumed(&self) -> SoapError {
        let consumed_at = self.consumed_at.clone().unwrap_or_default();
        error!(
            payload = ?self.payload_name,
            consumed_at = %consumed_at,
            "Message payload was already consumed"
        );
        SoapError::AlreadyConsumed { consumed_at }
    }

    /// Cursor over the payload, positioned at its first element. An empty
    /// Body yields an empty cursor every time.
    pub fn read_payload(&mut self) -> Result<Box<dyn XmlCursor>, SoapError> {
        if self.payload_name.is_none() {
            return Ok(Box::new(BufferedCursor::new(Arc::from(Vec::new()), self.body_namespaces())));
        }
        match std::mem::replace(&mut self.payload, PayloadState::Consumed) {
            PayloadState::Streaming(cursor) => {
                self.mark_consumed();
                Ok(cursor)
            }
            PayloadState::Buffered(buffer) => {
                self.mark_consumed();
                Ok(Box::new(buffer.cursor()))
            }
            PayloadState::Consumed => Err(self.already_consumed()),
        }
    }

    /// Payload cursor together with the namespace context of the Body.
    pub fn read_payload_as_source(&mut self) -> Result<PayloadSource, SoapError> {
        let namespaces = self.body_namespaces();
        let cursor = self.read_payload()?;
        Ok(PayloadSource { namespaces, cursor })
    }

    /// Cursor over the whole envelope: framing and headers from memory,
    /// the payload streamed.
    pub fn read_envelope(&mut self) -> Result<HybridReader, SoapError> {
        self.parse_headers()?;
        let document = SoapDocument::from_parts(
            self.version,
            &self.envelope_tag,
            self.header_tag.as_ref(),
            &self.headers,
            &self.body_tag,
        )?;
        let payload = self.read_payload()?;
        Ok(HybridReader::new(document, payload))
    }

    /// Write the whole envelope into `sink`. Consumes the payload.
    pub fn write_to(&mut self, sink: &mut dyn TokenSink) -> Result<(), SoapError> {
        let mut reader = self.read_envelope()?;
        let written = pipe(&mut reader, sink)?;
        trace!(tokens = written, "Message written");
        Ok(())
    }

    /// Materialize the message as a tree. Consumes the payload.
    pub fn read_as_document(&mut self) -> Result<SoapDocument, SoapError> {
        let mut writer = DeferredElementWriter::new(self.version);
        self.write_to(&mut writer)?;
        writer.finish()
    }

    /// Independent copy. The payload is buffered once and shared; both
    /// messages stay readable.
    pub fn copy(&mut self) -> Result<Message, SoapError> {
        let buffer = match std::mem::replace(&mut self.payload, PayloadState::Consumed) {
            PayloadState::Streaming(mut cursor) => {
                let tokens = collect_tokens(&mut cursor)?;
                debug!(
                    payload = ?self.payload_name,
                    tokens = tokens.len(),
                    "Buffered streaming payload for copy"
                );
                PayloadBuffer {
                    tokens: Arc::from(tokens),
                    inherited: self.body_namespaces(),
                }
            }
            PayloadState::Buffered(buffer) => buffer,
            PayloadState::Consumed => return Err(self.already_consumed()),
        };
        self.payload = PayloadState::Buffered(buffer.clone());

        Ok(Message {
            version: self.version,
            envelope_tag: self.envelope_tag.clone(),
            header_tag: self.header_tag.clone(),
            body_tag: self.body_tag.clone(),
            pending_headers: self.pending_headers.clone(),
            headers: self.headers.clone(),
            attachments: self.attachments.clone(),
            payload_name: self.payload_name.clone(),
            payload: PayloadState::Buffered(buffer),
            consumed_at: None,
        })
    }

    /// Read and discard the payload.
    pub fn consume(&mut self) -> Result<(), SoapError> {
        if self.payload_name.is_none() {
            self.mark_consumed();
            return Ok(());
        }
        let mut cursor = self.read_payload()?;
        while cursor.next_token()?.is_some() {}
        Ok(())
    }

    pub fn is_fault(&self) -> bool {
        self.payload_name
            .as_ref()
            .map(|n| n.namespace == self.version.namespace() && n.local == "Fault")
            .unwrap_or(false)
    }

    /// Parse the payload as a Fault. Consumes the payload.
    pub fn read_fault(&mut self) -> Result<SoapFault, SoapError> {
        let mut cursor = self.read_payload()?;
        let tokens = collect_tokens(&mut cursor)?;
        let mut fault = SoapFault::from_tokens(self.version, &tokens)?;

        let not_understood = QName::new(self.version.namespace(), "NotUnderstood");
        let envelope_decls = self.envelope_tag.namespace_decls().to_vec();
        for header in self.headers()?.iter().filter(|h| h.name() == &not_understood) {
            let Some(raw) = header.attribute("", "qname") else {
                continue;
            };
            let (prefix, local) = raw.split_once(':').unwrap_or(("", raw));
            let start_decls = match header.tokens().first() {
                Some(Token::StartElement(start)) => start.namespace_decls.clone(),
                _ => Vec::new(),
            };
            let namespace = start_decls
                .iter()
                .chain(envelope_decls.iter())
                .find(|d| d.prefix == prefix)
                .map(|d| d.uri.clone())
                .unwrap_or_default();
            fault.not_understood.push(QName::new(namespace, local));
        }
        Ok(fault)
    }

    /// Release attachments and any unread payload.
    pub fn close(mut self) {
        debug!(
            payload = ?self.payload_name,
            attachments = self.attachments.len(),
            "Closing message"
        );
        self.attachments.close();
        self.payload = PayloadState::Consumed;
    }
}

/// Payload cursor plus the namespace bindings of the enclosing Body.
pub struct PayloadSource {
    namespaces: Vec<NamespaceDecl>,
    cursor: Box<dyn XmlCursor>,
}

impl PayloadSource {
    pub fn namespaces(&self) -> &[NamespaceDecl] {
        &self.namespaces
    }

    pub fn cursor(&mut self) -> &mut dyn XmlCursor {
        self.cursor.as_mut()
    }

    /// Remaining payload tokens. Bindings inherited from the Envelope and
    /// Body are declared on the first element so the result stands alone.
    pub fn into_tokens(mut self) -> Result<Vec<Token>, SoapError> {
        let mut tokens = collect_tokens(self.cursor.as_mut())?;
        if let Some(Token::StartElement(root)) = tokens.iter_mut().find(|t| matches!(t, Token::StartElement(_))) {
            declare_inherited(root, &self.namespaces);
        }
        Ok(tokens)
    }

    pub fn into_xml_string(self) -> Result<String, SoapError> {
        tokens_to_string(&self.into_tokens()?)
    }
}

fn declare_inherited(root: &mut StartElement, inherited: &[NamespaceDecl]) {
    for decl in inherited {
        if !root.namespace_decls.iter().any(|d| d.prefix == decl.prefix) {
            root.namespace_decls.push(decl.clone());
        }
    }
}

/// `outer` then `inner`, inner bindings replacing outer ones per prefix.
fn merge_decls(outer: &[NamespaceDecl], inner: &[NamespaceDecl]) -> Vec<NamespaceDecl> {
    let mut merged: Vec<NamespaceDecl> = Vec::with_capacity(outer.len() + inner.len());
    for decl in outer.iter().chain(inner) {
        merged.retain(|d| d.prefix != decl.prefix);
        merged.push(decl.clone());
    }
    merged
}
