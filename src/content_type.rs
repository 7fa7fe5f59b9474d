//! Content-Type header parsing.

use crate::error::SoapError;
use crate::version::{SoapVersion, FAST_INFOSET_CONTENT_TYPE};
use std::fmt;

/// A parsed `type/subtype; name=value` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeHeader {
    media_type: String,
    parameters: Vec<(String, String)>,
}

impl ContentTypeHeader {
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: media_type.trim().to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn parse(raw: &str) -> Result<Self, SoapError> {
        let mut rest = raw.trim();
        let end = rest.find(';').unwrap_or(rest.len());
        let media_type = rest[..end].trim();
        if media_type.is_empty() || !media_type.contains('/') {
            return Err(SoapError::UnsupportedMediaType {
                content_type: raw.to_string(),
                expected: Vec::new(),
            });
        }
        let mut header = Self::new(media_type);
        rest = &rest[end..];

        while let Some(stripped) = rest.strip_prefix(';') {
            rest = stripped.trim_start();
            let Some(eq) = rest.find('=') else {
                // Bare token without a value; skip to the next parameter
                rest = rest.find(';').map(|i| &rest[i..]).unwrap_or("");
                continue;
            };
            let name = rest[..eq].trim().to_ascii_lowercase();
            rest = rest[eq + 1..].trim_start();
            let (value, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
                parse_quoted(quoted)
            } else {
                let end = rest.find(';').unwrap_or(rest.len());
                (rest[..end].trim().to_string(), &rest[end..])
            };
            header.parameters.push((name, value));
            rest = remaining.trim_start();
            if !rest.is_empty() && !rest.starts_with(';') {
                rest = rest.find(';').map(|i| &rest[i..]).unwrap_or("");
            }
        }
        Ok(header)
    }

    /// Lowercased `type/subtype`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Parameter value; names compare case-insensitively.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// Case-insensitive prefix match on the media type.
    pub fn matches(&self, prefix: &str) -> bool {
        self.media_type.starts_with(&prefix.to_ascii_lowercase())
    }

    /// Binary XML under `version`: its own binary type or the plain
    /// FastInfoset type.
    pub fn is_binary_xml(&self, version: SoapVersion) -> bool {
        self.matches(version.binary_content_type()) || self.matches(FAST_INFOSET_CONTENT_TYPE)
    }

    /// Reject charsets other than UTF-8 (US-ASCII is a subset).
    pub fn check_charset(&self) -> Result<(), SoapError> {
        match self.parameter("charset") {
            None => Ok(()),
            Some(charset) if is_utf8_compatible(charset) => Ok(()),
            Some(_) => Err(SoapError::UnsupportedMediaType {
                content_type: self.to_string(),
                expected: vec![format!("{}; charset=utf-8", self.media_type)],
            }),
        }
    }
}

fn is_utf8_compatible(charset: &str) -> bool {
    matches!(
        charset.trim().to_ascii_lowercase().as_str(),
        "utf-8" | "utf8" | "us-ascii" | "ascii"
    )
}

fn parse_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => {
                value.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            '"' => return (value, &input[i + 1..]),
            _ => value.push(c),
        }
    }
    (value, "")
}

impl fmt::Display for ContentTypeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type)?;
        for (name, value) in &self.parameters {
            let needs_quotes = value.is_empty()
                || value
                    .chars()
                    .any(|c| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c));
            if needs_quotes {
                write!(f, "; {}=\"{}\"", name, value.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, "; {}={}", name, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_type_and_parameters() {
        let ct = ContentTypeHeader::parse(
            r#"Multipart/Related; type="application/xop+xml"; boundary=uuid:abc; start="<root@x>"; start-info="text/xml""#,
        )
        .unwrap();
        assert_eq!(ct.media_type(), "multipart/related");
        assert!(ct.matches("MULTIPART/related"));
        assert_eq!(ct.parameter("TYPE"), Some("application/xop+xml"));
        assert_eq!(ct.parameter("boundary"), Some("uuid:abc"));
        assert_eq!(ct.parameter("start"), Some("<root@x>"));
        assert_eq!(ct.parameter("start-info"), Some("text/xml"));
    }

    #[test]
    fn test_parse_quoted_escapes() {
        let ct = ContentTypeHeader::parse(r#"application/soap+xml; action="urn:\"x\";y"; charset=UTF-8"#).unwrap();
        assert_eq!(ct.parameter("action"), Some(r#"urn:"x";y"#));
        assert_eq!(ct.parameter("charset"), Some("UTF-8"));
        assert!(ct.check_charset().is_ok());
    }

    #[test]
    fn test_rejects_non_utf8_charset() {
        let ct = ContentTypeHeader::parse("text/xml; charset=ISO-8859-1").unwrap();
        assert!(matches!(ct.check_charset(), Err(SoapError::UnsupportedMediaType { .. })));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ContentTypeHeader::parse("").is_err());
        assert!(ContentTypeHeader::parse("xml").is_err());
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let ct = ContentTypeHeader::new("multipart/related")
            .with_parameter("type", "application/xop+xml")
            .with_parameter("boundary", "uuid:1");
        assert_eq!(
            ct.to_string(),
            r#"multipart/related; type="application/xop+xml"; boundary="uuid:1""#
        );
        let reparsed = ContentTypeHeader::parse(&ct.to_string()).unwrap();
        assert_eq!(reparsed, ct);
    }
}
