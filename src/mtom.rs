//! MTOM/XOP packaging.
//!
//! The envelope travels as an `application/xop+xml` root part. Binary
//! content sits in the other parts and is referenced from the XML with
//! `xop:Include href="cid:..."` elements, which the decoder replaces by the
//! base64 text of the referenced part while streaming.

use crate::attachment::AttachmentSet;
use crate::codec::{packet_message, Codec, ContentType};
use crate::content_type::ContentTypeHeader;
use crate::cursor::{NamespaceScope, StreamCursor, Token, XmlCursor};
use crate::error::SoapError;
use crate::mime::{new_boundary, new_root_content_id, write_multipart, MimePart, MultipartRelated};
use crate::packet::{Packet, WireEncoding};
use crate::stream::StreamSoapCodec;
use crate::version::{SoapVersion, MULTIPART_RELATED, XOP_CONTENT_TYPE, XOP_NS};
use std::io::{BufRead, Read, Write};
use tracing::{debug, trace};

/// Cursor that inlines `xop:Include` references as base64 text.
pub struct XopCursor<C: XmlCursor> {
    inner: C,
    attachments: AttachmentSet,
}

impl<C: XmlCursor> XopCursor<C> {
    pub fn new(inner: C, attachments: AttachmentSet) -> Self {
        Self { inner, attachments }
    }

    fn inline(&mut self, href: &str) -> Result<Token, SoapError> {
        let attachment = self
            .attachments
            .get(href)
            .ok_or_else(|| SoapError::Attachment(format!("xop:Include refers to unknown part {}", href)))?;
        trace!(content_id = attachment.content_id(), bytes = attachment.len(), "Inlining XOP attachment");
        let text = attachment.to_base64();

        // Skip everything up to the matching end tag
        let mut depth = 1usize;
        while depth > 0 {
            match self.inner.next_token()? {
                Some(Token::StartElement(_)) => depth += 1,
                Some(Token::EndElement(_)) => depth -= 1,
                Some(_) => {}
                None => return Err(SoapError::XmlParse("unexpected end of document inside xop:Include".to_string())),
            }
        }
        Ok(Token::Text(text))
    }
}

impl<C: XmlCursor> XmlCursor for XopCursor<C> {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        match self.inner.next_token()? {
            Some(Token::StartElement(start)) if start.is(XOP_NS, "Include") => {
                let href = start
                    .attribute("", "href")
                    .ok_or_else(|| SoapError::InvalidEnvelope("xop:Include without href".to_string()))?
                    .to_string();
                self.inline(&href).map(Some)
            }
            other => Ok(other),
        }
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        self.inner.namespace_scope()
    }
}

#[derive(Debug, Clone)]
pub struct MtomCodec {
    xml: StreamSoapCodec,
}

impl MtomCodec {
    pub fn new(xml: StreamSoapCodec) -> Self {
        Self { xml }
    }

    /// Decode an already parsed multipart body whose root is XOP.
    pub fn decode_multipart(&self, multipart: MultipartRelated, packet: &mut Packet) -> Result<(), SoapError> {
        let (root, attachments) = multipart.into_root_and_attachments();
        let root_type = ContentTypeHeader::parse(root.content_type())?;
        if !root_type.matches(XOP_CONTENT_TYPE) {
            return Err(SoapError::UnsupportedMediaType {
                content_type: root.content_type().to_string(),
                expected: vec![XOP_CONTENT_TYPE.to_string()],
            });
        }
        root_type.check_charset()?;
        debug!(attachments = attachments.len(), "Decoding MTOM message");

        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(root.body().to_vec()));
        let cursor = XopCursor::new(StreamCursor::new(input), attachments.clone());
        packet.message = Some(self.xml.decode_cursor(Box::new(cursor), attachments)?);
        packet.chosen_encoding = Some(WireEncoding::Mtom);
        Ok(())
    }
}

impl Codec for MtomCodec {
    fn mime_type(&self) -> &str {
        MULTIPART_RELATED
    }

    fn decode(&self, mut input: Box<dyn BufRead>, content_type: &str, packet: &mut Packet) -> Result<(), SoapError> {
        let header = ContentTypeHeader::parse(content_type)?;
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        self.decode_multipart(MultipartRelated::parse(&header, &body)?, packet)
    }

    fn encode(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType, SoapError> {
        let version = self.xml.version();
        let soap_action = packet.soap_action.clone();
        let message = packet_message(packet)?;

        let mut envelope = Vec::new();
        self.xml.encode_message(message, &mut envelope)?;

        let start_info = version.content_type();
        let mut root_type = ContentTypeHeader::new(XOP_CONTENT_TYPE)
            .with_parameter("charset", "utf-8")
            .with_parameter("type", start_info);
        if let Some(action) = soap_action.as_deref().filter(|a| !a.is_empty()) {
            if version == SoapVersion::Soap12 {
                root_type = root_type.with_parameter("action", action);
            }
        }
        let root_id = new_root_content_id();
        let boundary = new_boundary();
        let root = MimePart::new(&root_type.to_string(), &root_id, envelope);
        write_multipart(&boundary, &root, message.attachments(), out)?;

        let header = ContentTypeHeader::new(MULTIPART_RELATED)
            .with_parameter("type", XOP_CONTENT_TYPE)
            .with_parameter("boundary", boundary)
            .with_parameter("start", format!("<{}>", root_id))
            .with_parameter("start-info", start_info);
        let mut content_type = ContentType::new(header.to_string());
        if version == SoapVersion::Soap11 {
            content_type.soap_action = Some(format!("\"{}\"", soap_action.unwrap_or_default()));
        }
        packet.chosen_encoding = Some(WireEncoding::Mtom);
        Ok(content_type)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;
    use crate::cursor::collect_tokens;
    use crate::message::Message;
    use crate::version::SOAP_12_NS;

    #[test]
    fn test_xop_include_is_inlined() {
        let xml = format!(
            r#"<r xmlns:xop="{}"><data><xop:Include href="cid:img%40x"/></data></r>"#,
            XOP_NS
        );
        let attachments: AttachmentSet = vec![Attachment::new("<img@x>", "image/png", vec![1u8, 2, 3])]
            .into_iter()
            .collect();
        let mut cursor = XopCursor::new(StreamCursor::from_bytes(xml), attachments);
        let tokens = collect_tokens(&mut cursor).unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[2], Token::Text("AQID".to_string()));
    }

    #[test]
    fn test_unknown_reference_fails() {
        let xml = format!(r#"<r xmlns:xop="{}"><xop:Include href="cid:none"/></r>"#, XOP_NS);
        let mut cursor = XopCursor::new(StreamCursor::from_bytes(xml), AttachmentSet::new());
        assert!(matches!(collect_tokens(&mut cursor), Err(SoapError::Attachment(_))));
    }

    #[test]
    fn test_encode_then_decode() {
        let codec = MtomCodec::new(StreamSoapCodec::new(SoapVersion::Soap12));
        let payload = format!(
            r#"<p:Upload xmlns:p="urn:p" xmlns:xop="{}"><p:file><xop:Include href="cid:file@x"/></p:file></p:Upload>"#,
            XOP_NS
        );
        let attachments = vec![Attachment::new("file@x", "application/octet-stream", b"hello".to_vec())]
            .into_iter()
            .collect();
        let message = Message::from_payload_xml(SoapVersion::Soap12, &payload)
            .unwrap()
            .with_attachments(attachments);
        let mut packet = Packet::new(message);

        let mut wire = Vec::new();
        let content_type = codec.encode(&mut packet, &mut wire).unwrap();
        assert!(content_type.content_type.starts_with("multipart/related"));
        assert!(String::from_utf8_lossy(&wire).contains(SOAP_12_NS));

        let mut inbound = Packet::default();
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(wire));
        codec.decode(input, &content_type.content_type, &mut inbound).unwrap();
        assert_eq!(inbound.chosen_encoding, Some(WireEncoding::Mtom));

        let message = inbound.message.as_mut().unwrap();
        let source = message.read_payload_as_source().unwrap();
        let xml = source.into_xml_string().unwrap();
        assert!(xml.contains("<p:file>aGVsbG8=</p:file>"), "{xml}");
    }
}
