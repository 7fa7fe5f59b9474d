//! Per-exchange state: the message plus the negotiation decisions made
//! while decoding or encoding it.
//!
//! Codecs keep no per-exchange state of their own; everything they decide
//! lands here so a single codec instance can serve many exchanges.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-side binary XML negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationMode {
    /// Never use binary XML
    #[default]
    None,
    /// Send binary XML straight away
    Optimistic,
    /// Send XML, advertise binary XML in Accept
    Pessimistic,
}

/// Wire encoding chosen for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireEncoding {
    Xml,
    BinaryXml,
    Mtom,
    XmlWithAttachments,
    BinaryXmlWithAttachments,
}

impl WireEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xml => "XML",
            Self::BinaryXml => "BINARY_XML",
            Self::Mtom => "MTOM",
            Self::XmlWithAttachments => "XML_WITH_ATTACHMENTS",
            Self::BinaryXmlWithAttachments => "BINARY_XML_WITH_ATTACHMENTS",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::BinaryXml | Self::BinaryXmlWithAttachments)
    }
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a request/response exchange.
#[derive(Debug, Default)]
pub struct Packet {
    pub message: Option<Message>,
    /// Unset on packets that did not come from a configured client
    pub negotiation: Option<NegotiationMode>,
    /// Accept header of the inbound request
    pub accept: Option<String>,
    pub soap_action: Option<String>,
    /// Encoding of the last decode/encode on this packet
    pub chosen_encoding: Option<WireEncoding>,
    /// The reply must be binary XML
    pub use_binary_xml: bool,
    pub http_status: Option<u16>,
}

impl Packet {
    pub fn new(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    pub fn with_negotiation(mut self, negotiation: NegotiationMode) -> Self {
        self.negotiation = Some(negotiation);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_soap_action(mut self, action: &str) -> Self {
        self.soap_action = Some(parse_soap_action(action));
        self
    }

    /// Reply packet that inherits the negotiated state.
    pub fn create_response(&self, message: Message) -> Packet {
        Packet {
            message: Some(message),
            negotiation: self.negotiation,
            accept: None,
            soap_action: None,
            chosen_encoding: None,
            use_binary_xml: self.use_binary_xml,
            http_status: None,
        }
    }
}

/// SOAPAction header value without surrounding quotes.
pub fn parse_soap_action(header_value: &str) -> String {
    header_value.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SoapVersion;

    #[test]
    fn test_response_inherits_negotiation() {
        let mut request = Packet::new(Message::empty(SoapVersion::Soap12))
            .with_negotiation(NegotiationMode::Pessimistic)
            .with_accept("application/soap+fastinfoset");
        request.use_binary_xml = true;
        request.http_status = Some(200);

        let response = request.create_response(Message::empty(SoapVersion::Soap12));
        assert_eq!(response.negotiation, Some(NegotiationMode::Pessimistic));
        assert!(response.use_binary_xml);
        assert!(response.accept.is_none());
        assert!(response.http_status.is_none());
    }

    #[test]
    fn test_parse_soap_action() {
        assert_eq!(parse_soap_action("\"urn:GetUser\""), "urn:GetUser");
        assert_eq!(parse_soap_action("  urn:GetUser  "), "urn:GetUser");
        let packet = Packet::default().with_soap_action("\"urn:x\"");
        assert_eq!(packet.soap_action.as_deref(), Some("urn:x"));
    }

    #[test]
    fn test_negotiation_mode_yaml_names() {
        let mode: NegotiationMode = serde_yaml::from_str("pessimistic").unwrap();
        assert_eq!(mode, NegotiationMode::Pessimistic);
        assert!(WireEncoding::BinaryXmlWithAttachments.is_binary());
        assert_eq!(WireEncoding::Mtom.to_string(), "MTOM");
    }
}
