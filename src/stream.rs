//! Plain XML envelope codec for one SOAP version.
//!
//! Decode walks the Envelope start tag and the Header blocks off the cursor,
//! stops right at the first payload element and leaves the rest of the
//! stream for the message to pull lazily.

use crate::attachment::AttachmentSet;
use crate::codec::{packet_message, Codec, ContentType};
use crate::config::{CodecConfig, HeadersConfig};
use crate::content_type::ContentTypeHeader;
use crate::cursor::{capture_subtree, next_significant, NamespaceScope, StreamCursor, Token, XmlCursor};
use crate::error::SoapError;
use crate::fault::SoapFault;
use crate::header::active_roles;
use crate::message::Message;
use crate::packet::{Packet, WireEncoding};
use crate::tag::TagInfoset;
use crate::version::SoapVersion;
use crate::writer::SoapWriter;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Payload part of a live document stream.
///
/// Starts with the already-read first payload token and returns `None` at
/// the Body end tag, after checking that only the Envelope end tag follows.
pub struct PayloadCursor {
    inner: Box<dyn XmlCursor>,
    pending: Option<Token>,
    depth: usize,
    done: bool,
}

impl PayloadCursor {
    pub fn new(inner: Box<dyn XmlCursor>, first: Token) -> Self {
        Self {
            inner,
            pending: Some(first),
            depth: 0,
            done: false,
        }
    }

    fn track(&mut self, token: &Token) {
        match token {
            Token::StartElement(_) => self.depth += 1,
            Token::EndElement(_) => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }
}

impl PayloadCursor {
    fn advance(&mut self) -> Result<Option<Token>, SoapError> {
        if self.done {
            return Ok(None);
        }
        if let Some(token) = self.pending.take() {
            self.track(&token);
            return Ok(Some(token));
        }
        match self.inner.next_token()? {
            Some(Token::EndElement(_)) if self.depth == 0 => {
                self.done = true;
                finish_envelope(self.inner.as_mut())?;
                Ok(None)
            }
            Some(token) => {
                self.track(&token);
                Ok(Some(token))
            }
            None => Err(SoapError::XmlParse("unexpected end of document inside Body".to_string())),
        }
    }
}

impl XmlCursor for PayloadCursor {
    /// Structural errors surface as Sender faults, like the ones raised
    /// while decoding the Envelope and Header.
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        self.advance().map_err(|e| {
            if e.is_internal() {
                e
            } else {
                debug!(error = %e, "payload read failed");
                e.into_fault()
            }
        })
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        self.inner.namespace_scope()
    }
}

/// After the Body end tag only the Envelope end tag may follow.
fn finish_envelope(cursor: &mut dyn XmlCursor) -> Result<(), SoapError> {
    match next_significant(cursor)? {
        Some(Token::EndElement(end)) if end.local_name == "Envelope" => {}
        Some(Token::StartElement(start)) => {
            return Err(SoapError::InvalidEnvelope(format!(
                "unexpected element {} after Body",
                start.name()
            )))
        }
        _ => return Err(SoapError::InvalidEnvelope("Envelope not closed after Body".to_string())),
    }
    match next_significant(cursor)? {
        None => Ok(()),
        Some(_) => Err(SoapError::InvalidEnvelope("content after Envelope end".to_string())),
    }
}

/// XML codec for one SOAP version.
#[derive(Debug, Clone)]
pub struct StreamSoapCodec {
    version: SoapVersion,
    headers: HeadersConfig,
}

impl StreamSoapCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            version,
            headers: HeadersConfig::default(),
        }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self {
            version: config.soap_version,
            headers: config.headers.clone(),
        }
    }

    pub fn with_headers(mut self, headers: HeadersConfig) -> Self {
        self.headers = headers;
        self
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// Transport content type for this version.
    pub fn content_type(&self, soap_action: Option<&str>) -> ContentType {
        let mut header = ContentTypeHeader::new(self.version.content_type()).with_parameter("charset", "utf-8");
        let mut content_type = ContentType::new(String::new());
        match self.version {
            SoapVersion::Soap11 => {
                content_type.soap_action = Some(format!("\"{}\"", soap_action.unwrap_or_default()));
            }
            SoapVersion::Soap12 => {
                if let Some(action) = soap_action.filter(|a| !a.is_empty()) {
                    header = header.with_parameter("action", action);
                }
            }
        }
        content_type.content_type = header.to_string();
        content_type
    }

    /// Decode a document from a live cursor. Structural and protocol
    /// errors come back as [`SoapError::Fault`].
    pub fn decode_cursor(
        &self,
        cursor: Box<dyn XmlCursor>,
        attachments: AttachmentSet,
    ) -> Result<Message, SoapError> {
        self.read_message(cursor, attachments).map_err(|err| {
            if !err.is_internal() {
                warn!(version = %self.version, error = %err, "Rejecting inbound SOAP message");
            }
            err.into_fault()
        })
    }

    pub fn decode_reader(&self, input: Box<dyn BufRead>, attachments: AttachmentSet) -> Result<Message, SoapError> {
        self.decode_cursor(Box::new(StreamCursor::new(input)), attachments)
    }

    pub fn decode_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<Message, SoapError> {
        self.decode_cursor(Box::new(StreamCursor::from_bytes(bytes)), AttachmentSet::new())
    }

    fn read_message(&self, mut cursor: Box<dyn XmlCursor>, attachments: AttachmentSet) -> Result<Message, SoapError> {
        let ns = self.version.namespace();

        let envelope = match next_significant(cursor.as_mut())? {
            Some(Token::StartElement(start)) => start,
            _ => return Err(SoapError::InvalidEnvelope("document has no root element".to_string())),
        };
        if envelope.namespace_uri != ns {
            return Err(SoapError::version_mismatch(self.version, &envelope.namespace_uri));
        }
        if envelope.local_name != "Envelope" {
            return Err(SoapError::InvalidEnvelope(format!(
                "root element must be Envelope, found {}",
                envelope.local_name
            )));
        }
        let envelope_tag = TagInfoset::from(&envelope);

        let mut header_tag = None;
        let mut header_blocks: Vec<Arc<[Token]>> = Vec::new();
        let mut next = next_significant(cursor.as_mut())?;
        if let Some(Token::StartElement(start)) = &next {
            if start.is(ns, "Header") {
                header_tag = Some(TagInfoset::from(start));
                loop {
                    match next_significant(cursor.as_mut())? {
                        Some(Token::StartElement(block)) => {
                            header_blocks.push(Arc::from(capture_subtree(cursor.as_mut(), block)?));
                        }
                        Some(Token::EndElement(_)) => break,
                        Some(_) => {
                            return Err(SoapError::InvalidEnvelope("character data inside Header".to_string()))
                        }
                        None => return Err(SoapError::XmlParse("unexpected end of document inside Header".to_string())),
                    }
                }
                next = next_significant(cursor.as_mut())?;
            }
        }

        let body = match next {
            Some(Token::StartElement(start)) if start.is(ns, "Body") => start,
            Some(Token::StartElement(start)) => {
                return Err(SoapError::InvalidEnvelope(format!("expected Body, found {}", start.name())))
            }
            _ => return Err(SoapError::InvalidEnvelope("Envelope has no Body".to_string())),
        };
        let body_tag = TagInfoset::from(&body);

        let (payload_name, payload) = match next_significant(cursor.as_mut())? {
            Some(Token::StartElement(first)) => {
                let name = first.name();
                let payload: Box<dyn XmlCursor> = Box::new(PayloadCursor::new(cursor, Token::StartElement(first)));
                (Some(name), payload)
            }
            Some(Token::EndElement(_)) => {
                finish_envelope(cursor.as_mut())?;
                (None, cursor)
            }
            Some(_) => return Err(SoapError::InvalidEnvelope("character data inside Body".to_string())),
            None => return Err(SoapError::XmlParse("unexpected end of document inside Body".to_string())),
        };

        debug!(
            version = %self.version,
            headers = header_blocks.len(),
            payload = ?payload_name,
            attachments = attachments.len(),
            "Decoded SOAP envelope"
        );

        let mut message = Message::from_stream(
            self.version,
            envelope_tag,
            header_tag,
            header_blocks,
            body_tag,
            payload_name,
            payload,
            attachments,
        );
        if self.headers.check_must_understand {
            self.check_headers(&mut message)?;
        }
        Ok(message)
    }

    /// Fail with every mandatory header targeted at this node that the
    /// application does not understand.
    pub fn check_headers(&self, message: &mut Message) -> Result<(), SoapError> {
        let roles = active_roles(self.version, &self.headers.roles);
        let understood = self.headers.understood_names();
        let offenders = message.headers()?.not_understood(&roles, &understood);
        if offenders.is_empty() {
            return Ok(());
        }
        Err(SoapError::MustUnderstand { headers: offenders })
    }

    /// Write the message with an XML declaration. Consumes the payload.
    pub fn encode_message(&self, message: &mut Message, out: &mut dyn Write) -> Result<(), SoapError> {
        if message.version() != self.version {
            return Err(SoapError::version_mismatch(self.version, message.version().namespace()));
        }
        let mut writer = SoapWriter::new(out);
        writer.write_declaration()?;
        message.write_to(&mut writer)
    }

    /// Server-side fault reply. Records HTTP 500 unless a status is set.
    pub fn write_fault(&self, packet: &mut Packet, fault: &SoapFault, out: &mut dyn Write) -> Result<ContentType, SoapError> {
        if packet.http_status.is_none() {
            packet.http_status = Some(500);
        }
        debug!(fault = %fault, status = ?packet.http_status, "Writing SOAP fault");
        packet.message = Some(Message::from_fault(self.version, fault)?);
        self.encode(packet, out)
    }
}

impl Codec for StreamSoapCodec {
    fn mime_type(&self) -> &str {
        self.version.content_type()
    }

    fn decode(&self, input: Box<dyn BufRead>, content_type: &str, packet: &mut Packet) -> Result<(), SoapError> {
        let header = ContentTypeHeader::parse(content_type)?;
        if !header.matches(self.version.content_type()) {
            return Err(SoapError::UnsupportedMediaType {
                content_type: content_type.to_string(),
                expected: vec![self.version.content_type().to_string()],
            });
        }
        header.check_charset()?;
        if let Some(action) = header.parameter("action") {
            packet.soap_action = Some(action.to_string());
        }
        packet.message = Some(self.decode_reader(input, AttachmentSet::new())?);
        packet.chosen_encoding = Some(WireEncoding::Xml);
        Ok(())
    }

    fn encode(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType, SoapError> {
        let content_type = self.content_type(packet.soap_action.as_deref());
        self.encode_message(packet_message(packet)?, out)?;
        packet.chosen_encoding = Some(WireEncoding::Xml);
        Ok(content_type)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
