//! The codec interface shared by every wire encoding.

use crate::error::SoapError;
use crate::message::Message;
use crate::packet::Packet;
use std::io::{BufRead, Write};

/// Transport headers describing an encoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub content_type: String,
    /// `SOAPAction` header value (1.1 only)
    pub soap_action: Option<String>,
    /// `Accept` header value advertising alternative encodings
    pub accept: Option<String>,
}

impl ContentType {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            soap_action: None,
            accept: None,
        }
    }
}

/// Encoder/decoder for one wire format.
///
/// Codecs hold configuration only. Per-exchange decisions are recorded on
/// the [`Packet`], so an instance can be reused for sequential exchanges;
/// concurrent callers each take their own instance via [`Codec::copy`].
pub trait Codec: Send {
    /// Media type this codec produces by default.
    fn mime_type(&self) -> &str;

    /// Decode `input` into `packet.message`.
    fn decode(&self, input: Box<dyn BufRead>, content_type: &str, packet: &mut Packet) -> Result<(), SoapError>;

    /// Encode `packet.message` into `out`.
    fn encode(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType, SoapError>;

    /// Independent instance with the same configuration.
    fn copy(&self) -> Box<dyn Codec>;
}

pub(crate) fn packet_message(packet: &mut Packet) -> Result<&mut Message, SoapError> {
    packet
        .message
        .as_mut()
        .ok_or_else(|| SoapError::InvalidEnvelope("packet carries no message".to_string()))
}
