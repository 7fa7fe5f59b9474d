//! Content negotiation across the wire encodings.
//!
//! [`SoapBindingCodec`] is the outermost codec. On decode it dispatches on
//! the inbound content type; on encode it picks an encoding from the
//! packet's negotiation mode, the message's attachments and the enabled
//! features. Every decision is recorded on the packet.

use crate::binary::BinaryXmlCodec;
use crate::codec::{Codec, ContentType};
use crate::config::{CodecConfig, FeaturesConfig};
use crate::content_type::ContentTypeHeader;
use crate::error::SoapError;
use crate::message::Message;
use crate::mime::{MultipartRelated, SwaCodec};
use crate::mtom::MtomCodec;
use crate::packet::{NegotiationMode, Packet, WireEncoding};
use crate::stream::StreamSoapCodec;
use crate::version::{SoapVersion, FAST_INFOSET_CONTENT_TYPE, MULTIPART_RELATED, XOP_CONTENT_TYPE};
use std::io::{BufRead, Read, Write};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SoapBindingCodec {
    version: SoapVersion,
    features: FeaturesConfig,
    client_mode: NegotiationMode,
    xml: StreamSoapCodec,
    binary: BinaryXmlCodec,
    swa: SwaCodec,
    mtom: MtomCodec,
}

impl SoapBindingCodec {
    pub fn new(config: &CodecConfig) -> Self {
        let xml = StreamSoapCodec::from_config(config);
        Self {
            version: config.soap_version,
            features: config.features.clone(),
            client_mode: config.negotiation.mode,
            binary: BinaryXmlCodec::new(xml.clone()),
            swa: SwaCodec::new(xml.clone()),
            mtom: MtomCodec::new(xml.clone()),
            xml,
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// Outbound client packet using the configured negotiation mode.
    pub fn create_packet(&self, message: Message) -> Packet {
        Packet::new(message).with_negotiation(self.client_mode)
    }

    /// Content types this codec decodes.
    pub fn expected_types(&self) -> Vec<String> {
        let mut types = vec![self.version.content_type().to_string(), MULTIPART_RELATED.to_string()];
        if self.features.binary_xml {
            types.push(self.version.binary_content_type().to_string());
            if self.version.binary_content_type() != FAST_INFOSET_CONTENT_TYPE {
                types.push(FAST_INFOSET_CONTENT_TYPE.to_string());
            }
        }
        types
    }

    fn unsupported(&self, content_type: &str) -> SoapError {
        SoapError::UnsupportedMediaType {
            content_type: content_type.to_string(),
            expected: self.expected_types(),
        }
    }

    /// Binary XML for an inbound message is acceptable unless it is disabled
    /// or the packet explicitly opted out of negotiation.
    fn accepts_binary(&self, packet: &Packet) -> bool {
        self.features.binary_xml && packet.negotiation != Some(NegotiationMode::None)
    }

    fn use_binary(&self, packet: &Packet) -> bool {
        if !self.features.binary_xml {
            return false;
        }
        match packet.negotiation {
            Some(NegotiationMode::Optimistic) => !self.features.mtom,
            Some(NegotiationMode::None) => false,
            Some(NegotiationMode::Pessimistic) | None => packet.use_binary_xml,
        }
    }

    /// Encoding `encode` would pick for this packet.
    pub fn select_encoding(&self, packet: &Packet) -> WireEncoding {
        let has_attachments = packet
            .message
            .as_ref()
            .map(|m| !m.attachments().is_empty())
            .unwrap_or(false);
        match (self.use_binary(packet), has_attachments) {
            (true, true) => WireEncoding::BinaryXmlWithAttachments,
            (true, false) => WireEncoding::BinaryXml,
            (false, true) if self.features.mtom => WireEncoding::Mtom,
            (false, true) => WireEncoding::XmlWithAttachments,
            (false, false) => WireEncoding::Xml,
        }
    }

    fn decode_multipart(&self, header: &ContentTypeHeader, body: &[u8], packet: &mut Packet) -> Result<(), SoapError> {
        let multipart = MultipartRelated::parse(header, body)?;
        let root_type = ContentTypeHeader::parse(multipart.root().content_type())?;
        if root_type.matches(XOP_CONTENT_TYPE) {
            return self.mtom.decode_multipart(multipart, packet);
        }
        if root_type.is_binary_xml(self.version) {
            if !self.accepts_binary(packet) {
                return Err(self.unsupported(multipart.root().content_type()));
            }
            packet.use_binary_xml = true;
        }
        self.swa.decode_multipart(multipart, packet)
    }
}

impl Codec for SoapBindingCodec {
    fn mime_type(&self) -> &str {
        self.version.content_type()
    }

    fn decode(&self, mut input: Box<dyn BufRead>, content_type: &str, packet: &mut Packet) -> Result<(), SoapError> {
        let header = ContentTypeHeader::parse(content_type).map_err(|_| self.unsupported(content_type))?;

        if header.matches(MULTIPART_RELATED) {
            let mut body = Vec::new();
            input.read_to_end(&mut body)?;
            self.decode_multipart(&header, &body, packet)?;
        } else if header.is_binary_xml(self.version) {
            if !self.accepts_binary(packet) {
                return Err(self.unsupported(content_type));
            }
            self.binary.decode(input, content_type, packet)?;
            packet.use_binary_xml = true;
        } else if header.matches(self.version.content_type()) {
            self.xml.decode(input, content_type, packet)?;
            let binary_type = self.version.binary_content_type();
            let advertised = packet
                .accept
                .as_deref()
                .map(|accept| accept.to_ascii_lowercase().contains(binary_type))
                .unwrap_or(false);
            if advertised && self.accepts_binary(packet) {
                packet.use_binary_xml = true;
            }
        } else {
            return Err(self.unsupported(content_type));
        }

        debug!(
            content_type = %header,
            encoding = ?packet.chosen_encoding,
            reply_binary = packet.use_binary_xml,
            "Decoded inbound message"
        );
        Ok(())
    }

    fn encode(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType, SoapError> {
        let encoding = self.select_encoding(packet);
        if packet.negotiation == Some(NegotiationMode::None) {
            packet.use_binary_xml = false;
        }
        debug!(encoding = %encoding, negotiation = ?packet.negotiation, "Encoding outbound message");

        let mut content_type = match encoding {
            WireEncoding::Xml => self.xml.encode(packet, out)?,
            WireEncoding::BinaryXml => self.binary.encode(packet, out)?,
            WireEncoding::Mtom => self.mtom.encode(packet, out)?,
            WireEncoding::XmlWithAttachments => self.swa.encode_with(packet, out, false)?,
            WireEncoding::BinaryXmlWithAttachments => self.swa.encode_with(packet, out, true)?,
        };
        if packet.negotiation == Some(NegotiationMode::Pessimistic) && self.features.binary_xml && !encoding.is_binary() {
            content_type.accept = Some(format!(
                "{}, {}",
                self.version.binary_content_type(),
                self.version.content_type()
            ));
        }
        packet.chosen_encoding = Some(encoding);
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
    use crate::version::SOAP_12_NS;

    fn codec(mtom: bool, binary_xml: bool) -> SoapBindingCodec {
        let mut config = CodecConfig {
            soap_version: SoapVersion::Soap12,
            ..CodecConfig::default()
        };
        config.features = FeaturesConfig { mtom, binary_xml };
        SoapBindingCodec::new(&config)
    }

    fn packet(attachments: bool, negotiation: Option<NegotiationMode>) -> Packet {
        let mut message = Message::from_payload_xml(SoapVersion::Soap12, "<Ping/>").unwrap();
        if attachments {
            message = message.with_attachments(vec![Attachment::new("a@x", "text/plain", "a")].into_iter().collect());
        }
        let mut packet = Packet::new(message);
        packet.negotiation = negotiation;
        packet
    }

    fn envelope() -> Vec<u8> {
        format!(
            r#"<env:Envelope xmlns:env="{}"><env:Body><Ping/></env:Body></env:Envelope>"#,
            SOAP_12_NS
        )
        .into_bytes()
    }

    #[test]
    fn test_decision_table() {
        let plain = codec(false, true);
        assert_eq!(plain.select_encoding(&packet(false, None)), WireEncoding::Xml);
        assert_eq!(plain.select_encoding(&packet(true, None)), WireEncoding::XmlWithAttachments);
        assert_eq!(
            plain.select_encoding(&packet(false, Some(NegotiationMode::Optimistic))),
            WireEncoding::BinaryXml
        );
        assert_eq!(
            plain.select_encoding(&packet(true, Some(NegotiationMode::Optimistic))),
            WireEncoding::BinaryXmlWithAttachments
        );

        let mut chosen_before = packet(false, Some(NegotiationMode::None));
        chosen_before.use_binary_xml = true;
        assert_eq!(plain.select_encoding(&chosen_before), WireEncoding::Xml);

        let mtom = codec(true, true);
        assert_eq!(mtom.select_encoding(&packet(true, None)), WireEncoding::Mtom);
        assert_eq!(
            mtom.select_encoding(&packet(true, Some(NegotiationMode::Optimistic))),
            WireEncoding::Mtom
        );

        let no_binary = codec(false, false);
        let mut wants_binary = packet(false, Some(NegotiationMode::Optimistic));
        wants_binary.use_binary_xml = true;
        assert_eq!(no_binary.select_encoding(&wants_binary), WireEncoding::Xml);
    }

    #[test]
    fn test_decode_plain_xml() {
        let codec = codec(false, true);
        let mut packet = Packet::default();
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(envelope()));
        codec.decode(input, "application/soap+xml; charset=utf-8", &mut packet).unwrap();
        assert_eq!(packet.chosen_encoding, Some(WireEncoding::Xml));
        assert!(!packet.use_binary_xml);
    }

    #[test]
    fn test_pessimistic_client_gets_binary_reply() {
        let codec = codec(false, true);
        let mut request = Packet::default().with_accept("application/soap+fastinfoset, application/soap+xml");
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(envelope()));
        codec.decode(input, "application/soap+xml", &mut request).unwrap();
        assert!(request.use_binary_xml);

        let mut response = request.create_response(Message::empty(SoapVersion::Soap12));
        let mut out = Vec::new();
        let content_type = codec.encode(&mut response, &mut out).unwrap();
        assert_eq!(content_type.content_type, "application/soap+fastinfoset");
        assert_eq!(response.chosen_encoding, Some(WireEncoding::BinaryXml));
    }

    #[test]
    fn test_pessimistic_client_advertises_binary() {
        let codec = codec(false, true);
        let mut packet = packet(false, Some(NegotiationMode::Pessimistic));
        let content_type = codec.encode(&mut packet, &mut Vec::new()).unwrap();
        assert!(content_type.content_type.starts_with("application/soap+xml"));
        assert_eq!(
            content_type.accept.as_deref(),
            Some("application/soap+fastinfoset, application/soap+xml")
        );
    }

    #[test]
    fn test_binary_rejected_without_negotiation() {
        let codec = codec(false, true);
        let mut packet = Packet::default().with_negotiation(NegotiationMode::None);
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(Vec::new()));
        let err = codec.decode(input, "application/soap+fastinfoset", &mut packet).unwrap_err();
        assert!(matches!(err, SoapError::UnsupportedMediaType { .. }));
    }

    #[test]
    fn test_unknown_type_lists_expected() {
        let codec = codec(false, true);
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(Vec::new()));
        match codec.decode(input, "image/png", &mut Packet::default()) {
            Err(SoapError::UnsupportedMediaType { expected, .. }) => {
                assert_eq!(
                    expected,
                    vec![
                        "application/soap+xml",
                        "multipart/related",
                        "application/soap+fastinfoset",
                        "application/fastinfoset"
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_binary_round_trip_through_negotiation() {
        let codec = codec(false, true);
        let mut outbound = packet(false, Some(NegotiationMode::Optimistic));
        let mut wire = Vec::new();
        let content_type = codec.encode(&mut outbound, &mut wire).unwrap();

        let mut inbound = Packet::default();
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(wire));
        codec.decode(input, &content_type.content_type, &mut inbound).unwrap();
        assert_eq!(inbound.chosen_encoding, Some(WireEncoding::BinaryXml));
        assert!(inbound.use_binary_xml);
        assert_eq!(inbound.message.as_ref().unwrap().payload_local_name(), Some("Ping"));
    }

    #[test]
    fn test_plain_fastinfoset_type_decodes_as_binary() {
        let codec = codec(false, true);
        let mut outbound = packet(false, Some(NegotiationMode::Optimistic));
        let mut wire = Vec::new();
        codec.encode(&mut outbound, &mut wire).unwrap();

        let mut inbound = Packet::default();
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(wire));
        codec.decode(input, "Application/FastInfoset", &mut inbound).unwrap();
        assert_eq!(inbound.chosen_encoding, Some(WireEncoding::BinaryXml));
        assert!(inbound.use_binary_xml);
    }

    #[test]
    fn test_copy_is_independent_instance() {
        let original = codec(true, false);
        let copy = original.copy();
        assert_eq!(copy.mime_type(), "application/soap+xml");
    }
}
