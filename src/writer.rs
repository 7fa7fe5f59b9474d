//! Token sinks and the streaming XML writer.

use crate::cursor::{Token, XmlCursor};
use crate::error::SoapError;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

/// Anything a message can be written into.
pub trait TokenSink {
    fn write_token(&mut self, token: &Token) -> Result<(), SoapError>;
}

/// Copy every remaining token of `cursor` into `sink`.
pub fn pipe(cursor: &mut dyn XmlCursor, sink: &mut dyn TokenSink) -> Result<usize, SoapError> {
    let mut count = 0;
    while let Some(token) = cursor.next_token()? {
        sink.write_token(&token)?;
        count += 1;
    }
    Ok(count)
}

/// quick-xml backed writer emitting tokens verbatim, prefixes and
/// namespace declarations included.
pub struct SoapWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> SoapWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
        }
    }

    pub fn write_declaration(&mut self) -> Result<(), SoapError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write> TokenSink for SoapWriter<W> {
    fn write_token(&mut self, token: &Token) -> Result<(), SoapError> {
        match token {
            Token::StartElement(start) => {
                let mut element = BytesStart::new(start.qualified_name());
                for decl in &start.namespace_decls {
                    let key = if decl.prefix.is_empty() {
                        "xmlns".to_string()
                    } else {
                        format!("xmlns:{}", decl.prefix)
                    };
                    element.push_attribute((key.as_str(), decl.uri.as_str()));
                }
                for attr in &start.attributes {
                    let key = attr.qualified_name();
                    element.push_attribute((key.as_str(), attr.value.as_str()));
                }
                self.writer.write_event(Event::Start(element))?;
            }
            Token::EndElement(end) => {
                self.writer
                    .write_event(Event::End(BytesEnd::new(end.qualified_name())))?;
            }
            Token::Text(text) => {
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            Token::CData(text) => {
                self.writer.write_event(Event::CData(BytesCData::new(text.as_str())))?;
            }
            Token::Comment(text) => {
                self.writer
                    .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
            }
        }
        Ok(())
    }
}

/// Serialize tokens without an XML declaration.
pub fn tokens_to_string(tokens: &[Token]) -> Result<String, SoapError> {
    let mut writer = SoapWriter::new(Vec::new());
    for token in tokens {
        writer.write_token(token)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| SoapError::XmlParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{collect_tokens, Attribute, StartElement, StreamCursor};

    #[test]
    fn test_writes_prefixes_and_declarations() {
        let start = StartElement::new("urn:a", "Item", "a")
            .with_decl("a", "urn:a")
            .with_attribute(Attribute::local("id", "1 < 2"));
        let tokens = vec![
            Token::StartElement(start.clone()),
            Token::Text("x & y".to_string()),
            Token::EndElement(start.end()),
        ];
        assert_eq!(
            tokens_to_string(&tokens).unwrap(),
            r#"<a:Item xmlns:a="urn:a" id="1 &lt; 2">x &amp; y</a:Item>"#
        );
    }

    #[test]
    fn test_pipe_preserves_document() {
        let xml = r#"<r xmlns="urn:r"><c a="1"><![CDATA[<raw>]]></c><!-- note --></r>"#;
        let mut cursor = StreamCursor::from_bytes(xml);
        let mut writer = SoapWriter::new(Vec::new());
        let count = pipe(&mut cursor, &mut writer).unwrap();
        assert_eq!(count, 6);
        let written = String::from_utf8(writer.into_inner()).unwrap();
        let reparsed = collect_tokens(&mut StreamCursor::from_bytes(written.clone())).unwrap();
        let original = collect_tokens(&mut StreamCursor::from_bytes(xml)).unwrap();
        assert_eq!(reparsed, original, "{written}");
    }
}
