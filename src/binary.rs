//! Binary XML encoding.
//!
//! The binary form is the envelope's token sequence serialized with bincode
//! behind a four byte FastInfoset-style identification header. Decoding
//! replays the tokens through the regular envelope reader.

use crate::attachment::AttachmentSet;
use crate::codec::{packet_message, Codec, ContentType};
use crate::content_type::ContentTypeHeader;
use crate::cursor::{collect_tokens, BufferedCursor, Token};
use crate::error::SoapError;
use crate::message::Message;
use crate::packet::{Packet, WireEncoding};
use crate::stream::StreamSoapCodec;
use crate::version::SoapVersion;
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Identification header of a binary XML document.
pub const BINARY_XML_HEADER: [u8; 4] = [0xE0, 0x00, 0x00, 0x01];

pub fn encode_tokens(tokens: &[Token]) -> Result<Vec<u8>, SoapError> {
    let mut out = BINARY_XML_HEADER.to_vec();
    let body = bincode::encode_to_vec(tokens, bincode::config::standard())
        .map_err(|e| SoapError::BinaryXml(e.to_string()))?;
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_tokens(bytes: &[u8]) -> Result<Vec<Token>, SoapError> {
    let body = bytes
        .strip_prefix(&BINARY_XML_HEADER[..])
        .ok_or_else(|| SoapError::BinaryXml("missing binary XML identification header".to_string()))?;
    let (tokens, read): (Vec<Token>, usize) = bincode::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| SoapError::BinaryXml(e.to_string()))?;
    if read != body.len() {
        return Err(SoapError::BinaryXml(format!(
            "{} trailing bytes after binary XML document",
            body.len() - read
        )));
    }
    Ok(tokens)
}

/// Binary XML codec for one SOAP version.
#[derive(Debug, Clone)]
pub struct BinaryXmlCodec {
    xml: StreamSoapCodec,
}

impl BinaryXmlCodec {
    pub fn new(xml: StreamSoapCodec) -> Self {
        Self { xml }
    }

    pub fn version(&self) -> SoapVersion {
        self.xml.version()
    }

    pub fn decode_bytes(&self, bytes: &[u8], attachments: AttachmentSet) -> Result<Message, SoapError> {
        let tokens = decode_tokens(bytes)?;
        debug!(tokens = tokens.len(), "Decoded binary XML document");
        let cursor = BufferedCursor::new(Arc::from(tokens), Vec::new());
        self.xml.decode_cursor(Box::new(cursor), attachments)
    }

    /// Serialize the whole envelope. Consumes the payload.
    pub fn encode_message(&self, message: &mut Message, out: &mut dyn Write) -> Result<(), SoapError> {
        let mut reader = message.read_envelope()?;
        let tokens = collect_tokens(&mut reader)?;
        out.write_all(&encode_tokens(&tokens)?)?;
        Ok(())
    }
}

impl Codec for BinaryXmlCodec {
    fn mime_type(&self) -> &str {
        self.version().binary_content_type()
    }

    fn decode(&self, mut input: Box<dyn BufRead>, content_type: &str, packet: &mut Packet) -> Result<(), SoapError> {
        let header = ContentTypeHeader::parse(content_type)?;
        if !header.is_binary_xml(self.version()) {
            return Err(SoapError::UnsupportedMediaType {
                content_type: content_type.to_string(),
                expected: vec![self.mime_type().to_string()],
            });
        }
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        packet.message = Some(self.decode_bytes(&bytes, AttachmentSet::new())?);
        packet.chosen_encoding = Some(WireEncoding::BinaryXml);
        Ok(())
    }

    fn encode(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType, SoapError> {
        let mut content_type = ContentType::new(self.mime_type());
        if self.version() == SoapVersion::Soap11 {
            content_type.soap_action = Some(format!("\"{}\"", packet.soap_action.as_deref().unwrap_or_default()));
        }
        self.encode_message(packet_message(packet)?, out)?;
        packet.chosen_encoding = Some(WireEncoding::BinaryXml);
        Ok(content_type)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::tag::QName;

    #[test]
    fn test_rejects_missing_header() {
        assert!(matches!(decode_tokens(b"<xml/>"), Err(SoapError::BinaryXml(_))));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode_tokens(&[Token::Text("x".to_string())]).unwrap();
        bytes.push(0);
        assert!(decode_tokens(&bytes).is_err());
    }

    #[test]
    fn test_message_survives_binary_form() {
        let codec = BinaryXmlCodec::new(StreamSoapCodec::new(SoapVersion::Soap12));
        let mut message = Message::from_payload_xml(SoapVersion::Soap12, r#"<p:Op xmlns:p="urn:p">1</p:Op>"#).unwrap();
        message
            .add_header(Header::text(SoapVersion::Soap12, QName::new("urn:h", "Id"), "h", "7").unwrap())
            .unwrap();
        let mut bytes = Vec::new();
        codec.encode_message(&mut message, &mut bytes).unwrap();
        assert_eq!(&bytes[..4], &BINARY_XML_HEADER);

        let mut decoded = codec.decode_bytes(&bytes, AttachmentSet::new()).unwrap();
        assert_eq!(decoded.payload_name(), Some(&QName::new("urn:p", "Op")));
        assert_eq!(decoded.headers().unwrap().get(&QName::new("urn:h", "Id")).unwrap().string_value(), "7");
    }
}
