//! `multipart/related` packaging and the SOAP-with-attachments codec.

use crate::attachment::{normalize_content_id, Attachment, AttachmentSet};
use crate::binary::BinaryXmlCodec;
use crate::codec::{packet_message, Codec, ContentType};
use crate::content_type::ContentTypeHeader;
use crate::error::SoapError;
use crate::packet::{Packet, WireEncoding};
use crate::stream::StreamSoapCodec;
use crate::version::{SoapVersion, MULTIPART_RELATED};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::{BufRead, Read, Write};
use tracing::debug;
use uuid::Uuid;

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MimePart {
    pub fn new(content_type: &str, content_id: &str, body: Vec<u8>) -> Self {
        Self {
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Transfer-Encoding".to_string(), "binary".to_string()),
                ("Content-ID".to_string(), format!("<{}>", normalize_content_id(content_id))),
            ],
            body,
        }
    }

    /// Header value; names compare case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("application/octet-stream")
    }

    /// Normalized content-id, if the part has one.
    pub fn content_id(&self) -> Option<String> {
        self.header("content-id").map(normalize_content_id)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_attachment(self, fallback_id: &str) -> Attachment {
        let content_id = self.content_id().unwrap_or_else(|| fallback_id.to_string());
        let content_type = self.content_type().to_string();
        Attachment::new(&content_id, content_type, self.body)
    }

    fn write_to(&self, boundary: &str, out: &mut dyn Write) -> Result<(), SoapError> {
        write!(out, "--{}\r\n", boundary)?;
        for (name, value) in &self.headers {
            write!(out, "{}: {}\r\n", name, value)?;
        }
        out.write_all(b"\r\n")?;
        out.write_all(&self.body)?;
        out.write_all(b"\r\n")?;
        Ok(())
    }
}

/// Parts of a `multipart/related` body plus the index of its root part.
#[derive(Debug, Clone)]
pub struct MultipartRelated {
    parts: Vec<MimePart>,
    root: usize,
}

impl MultipartRelated {
    /// Parse `body` using the boundary and `start` parameters of
    /// `content_type`. Without `start` the first part is the root.
    pub fn parse(content_type: &ContentTypeHeader, body: &[u8]) -> Result<Self, SoapError> {
        let boundary = content_type
            .parameter("boundary")
            .ok_or_else(|| SoapError::Attachment("multipart content type has no boundary".to_string()))?;
        let parts = split_parts(body, boundary)?;
        if parts.is_empty() {
            return Err(SoapError::Attachment("multipart body has no parts".to_string()));
        }

        let root = match content_type.parameter("start") {
            Some(start) => {
                let wanted = normalize_content_id(start);
                parts
                    .iter()
                    .position(|p| p.content_id().as_deref() == Some(wanted.as_str()))
                    .ok_or_else(|| SoapError::Attachment(format!("root part <{}> not found", wanted)))?
            }
            None => 0,
        };
        debug!(parts = parts.len(), root, "Parsed multipart/related body");
        Ok(Self { parts, root })
    }

    pub fn root(&self) -> &MimePart {
        &self.parts[self.root]
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Root part and every other part as an attachment.
    pub fn into_root_and_attachments(mut self) -> (MimePart, AttachmentSet) {
        let root = self.parts.remove(self.root);
        let attachments = self
            .parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| part.into_attachment(&format!("part{}", i + 1)))
            .collect();
        (root, attachments)
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn split_parts(body: &[u8], boundary: &str) -> Result<Vec<MimePart>, SoapError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut position = find(body, &delimiter, 0)
        .ok_or_else(|| SoapError::Attachment("multipart boundary not found".to_string()))?;
    let mut parts = Vec::new();

    loop {
        let after = position + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        let line_end = find(body, b"\n", after)
            .ok_or_else(|| SoapError::Attachment("truncated multipart body".to_string()))?;
        let start = line_end + 1;
        let next = find(body, &delimiter, start)
            .ok_or_else(|| SoapError::Attachment("unterminated multipart part".to_string()))?;

        // The line break before a delimiter belongs to the delimiter
        let mut end = next;
        if end > start && body[end - 1] == b'\n' {
            end -= 1;
            if end > start && body[end - 1] == b'\r' {
                end -= 1;
            }
        }
        parts.push(parse_part(&body[start..end])?);
        position = next;
    }
    Ok(parts)
}

fn parse_part(raw: &[u8]) -> Result<MimePart, SoapError> {
    let (head, body) = match find(raw, b"\r\n\r\n", 0) {
        Some(i) => (&raw[..i], &raw[i + 4..]),
        None => match find(raw, b"\n\n", 0) {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None if raw.starts_with(b"\r\n") => (&raw[..0], &raw[2..]),
            None => return Err(SoapError::Attachment("multipart part has no header block".to_string())),
        },
    };

    let head = String::from_utf8_lossy(head);
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut part = MimePart {
        headers,
        body: body.to_vec(),
    };
    let encoding = part
        .header("content-transfer-encoding")
        .map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        None | Some("binary") | Some("8bit") | Some("7bit") => {}
        Some("base64") => {
            let compact: Vec<u8> = part.body.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            part.body = STANDARD
                .decode(compact)
                .map_err(|e| SoapError::Attachment(format!("invalid base64 part: {}", e)))?;
        }
        Some(other) => {
            return Err(SoapError::Attachment(format!(
                "unsupported content transfer encoding {}",
                other
            )))
        }
    }
    Ok(part)
}

/// Fresh boundary string.
pub fn new_boundary() -> String {
    format!("uuid:{}", Uuid::new_v4())
}

/// Fresh content-id for a root part.
pub fn new_root_content_id() -> String {
    format!("rootpart*{}@example.org", Uuid::new_v4())
}

/// Write a root part followed by every attachment.
pub fn write_multipart(
    boundary: &str,
    root: &MimePart,
    attachments: &AttachmentSet,
    out: &mut dyn Write,
) -> Result<(), SoapError> {
    root.write_to(boundary, out)?;
    for attachment in attachments.iter() {
        let part = MimePart::new(attachment.content_type(), attachment.content_id(), attachment.as_bytes().to_vec());
        part.write_to(boundary, out)?;
    }
    write!(out, "--{}--\r\n", boundary)?;
    Ok(())
}

/// SOAP with attachments: the envelope travels as the root part of a
/// `multipart/related` body, in XML or binary XML form.
#[derive(Debug, Clone)]
pub struct SwaCodec {
    xml: StreamSoapCodec,
    binary: BinaryXmlCodec,
}

impl SwaCodec {
    pub fn new(xml: StreamSoapCodec) -> Self {
        Self {
            binary: BinaryXmlCodec::new(xml.clone()),
            xml,
        }
    }

    /// Decode an already parsed multipart body.
    pub fn decode_multipart(&self, multipart: MultipartRelated, packet: &mut Packet) -> Result<(), SoapError> {
        let (root, attachments) = multipart.into_root_and_attachments();
        let root_type = ContentTypeHeader::parse(root.content_type())?;
        let version = self.xml.version();
        if root_type.is_binary_xml(version) {
            packet.message = Some(self.binary.decode_bytes(root.body(), attachments)?);
            packet.chosen_encoding = Some(WireEncoding::BinaryXmlWithAttachments);
        } else if root_type.matches(version.content_type()) {
            root_type.check_charset()?;
            let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(root.body().to_vec()));
            packet.message = Some(self.xml.decode_reader(input, attachments)?);
            packet.chosen_encoding = Some(WireEncoding::XmlWithAttachments);
        } else {
            return Err(SoapError::UnsupportedMediaType {
                content_type: root.content_type().to_string(),
                expected: vec![
                    version.content_type().to_string(),
                    version.binary_content_type().to_string(),
                ],
            });
        }
        Ok(())
    }

    /// Encode as multipart with the envelope in binary XML form when
    /// `binary` is set.
    pub fn encode_with(&self, packet: &mut Packet, out: &mut dyn Write, binary: bool) -> Result<ContentType, SoapError> {
        let version = self.xml.version();
        let soap_action = packet.soap_action.clone();
        let message = packet_message(packet)?;

        let mut envelope = Vec::new();
        let root_type = if binary {
            self.binary.encode_message(message, &mut envelope)?;
            version.binary_content_type().to_string()
        } else {
            self.xml.encode_message(message, &mut envelope)?;
            self.xml.content_type(soap_action.as_deref()).content_type
        };
        let root_id = new_root_content_id();
        let boundary = new_boundary();
        let root = MimePart::new(&root_type, &root_id, envelope);
        write_multipart(&boundary, &root, message.attachments(), out)?;

        let media_type = ContentTypeHeader::parse(&root_type)?.media_type().to_string();
        let header = ContentTypeHeader::new(MULTIPART_RELATED)
            .with_parameter("type", media_type)
            .with_parameter("boundary", boundary)
            .with_parameter("start", format!("<{}>", root_id));
        let mut content_type = ContentType::new(header.to_string());
        if version == SoapVersion::Soap11 {
            content_type.soap_action = Some(format!("\"{}\"", soap_action.unwrap_or_default()));
        }
        packet.chosen_encoding = Some(if binary {
            WireEncoding::BinaryXmlWithAttachments
        } else {
            WireEncoding::XmlWithAttachments
        });
        Ok(content_type)
    }
}

impl Codec for SwaCodec {
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
        let binary = packet.use_binary_xml;
        self.encode_with(packet, out, binary)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SOAP_11_NS;

    fn sample_body() -> Vec<u8> {
        format!(
            "preamble\r\n--MIME_boundary\r\nContent-Type: text/xml; charset=UTF-8\r\nContent-ID: <root@x>\r\n\r\n\
<S:Envelope xmlns:S=\"{}\"><S:Body><m:Claim xmlns:m=\"urn:m\"/></S:Body></S:Envelope>\r\n\
--MIME_boundary\r\nContent-Type: image/png\r\nContent-Transfer-Encoding: base64\r\nContent-ID: <img@x>\r\n\r\n\
AQID\r\n--MIME_boundary--\r\n",
            SOAP_11_NS
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_multipart_related() {
        let ct = ContentTypeHeader::parse("multipart/related; type=\"text/xml\"; boundary=MIME_boundary; start=\"<root@x>\"").unwrap();
        let multipart = MultipartRelated::parse(&ct, &sample_body()).unwrap();
        assert_eq!(multipart.len(), 2);
        assert_eq!(multipart.root().content_id().as_deref(), Some("root@x"));
        let (_, attachments) = multipart.into_root_and_attachments();
        assert_eq!(attachments.get("cid:img@x").unwrap().as_bytes(), &[1u8, 2, 3]);
    }

    #[test]
    fn test_missing_boundary_and_root() {
        let ct = ContentTypeHeader::parse("multipart/related").unwrap();
        assert!(MultipartRelated::parse(&ct, b"").is_err());
        let ct = ContentTypeHeader::parse("multipart/related; boundary=MIME_boundary; start=\"<nope>\"").unwrap();
        assert!(MultipartRelated::parse(&ct, &sample_body()).is_err());
    }

    #[test]
    fn test_swa_decode_and_reencode() {
        let codec = SwaCodec::new(StreamSoapCodec::new(SoapVersion::Soap11));
        let mut packet = Packet::default();
        let input: Box<dyn BufRead> = Box::new(std::io::Cursor::new(sample_body()));
        codec
            .decode(input, "multipart/related; type=\"text/xml\"; boundary=MIME_boundary", &mut packet)
            .unwrap();
        assert_eq!(packet.chosen_encoding, Some(WireEncoding::XmlWithAttachments));
        let message = packet.message.as_ref().unwrap();
        assert_eq!(message.payload_local_name(), Some("Claim"));
        assert_eq!(message.attachments().len(), 1);

        let mut out = Vec::new();
        let content_type = codec.encode(&mut packet, &mut out).unwrap();
        let header = ContentTypeHeader::parse(&content_type.content_type).unwrap();
        let reparsed = MultipartRelated::parse(&header, &out).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert!(reparsed.root().content_type().starts_with("text/xml"));
    }
}
