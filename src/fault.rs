//! SOAP Fault model and its per-version wire shapes.

use crate::cursor::{Attribute, StartElement, Token};
use crate::error::SoapError;
use crate::header::Header;
use crate::tag::QName;
use crate::version::{SoapVersion, XML_NS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version-neutral fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCode {
    /// `Client` in 1.1, `Sender` in 1.2
    Sender,
    /// `Server` in 1.1, `Receiver` in 1.2
    Receiver,
    VersionMismatch,
    MustUnderstand,
}

impl FaultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "SENDER",
            Self::Receiver => "RECEIVER",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::MustUnderstand => "MUST_UNDERSTAND",
        }
    }
}

/// A SOAP fault.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapFault {
    pub code: FaultCode,
    pub reason: String,
    /// `faultactor` in 1.1, `Role` in 1.2
    pub actor: Option<String>,
    /// 1.2 only
    pub node: Option<String>,
    /// Children of the detail element
    pub detail: Vec<Token>,
    /// Mandatory headers that were not understood
    pub not_understood: Vec<QName>,
}

impl SoapFault {
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            actor: None,
            node: None,
            detail: Vec::new(),
            not_understood: Vec::new(),
        }
    }

    pub fn sender(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Sender, reason)
    }

    pub fn receiver(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Receiver, reason)
    }

    pub fn version_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            FaultCode::VersionMismatch,
            format!("Couldn't create SOAP message. Expected Envelope in namespace {} but found {}", expected, found),
        )
    }

    pub fn must_understand(headers: Vec<QName>) -> Self {
        let names = headers.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let mut fault = Self::new(
            FaultCode::MustUnderstand,
            format!("MustUnderstand headers:[{}] are not understood", names),
        );
        fault.not_understood = headers;
        fault
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_detail(mut self, detail: Vec<Token>) -> Self {
        self.detail = detail;
        self
    }

    /// Fault element tokens for the Body. `prefix` must be bound to the
    /// envelope namespace by the enclosing envelope.
    pub fn to_tokens(&self, version: SoapVersion, prefix: &str) -> Vec<Token> {
        let ns = version.namespace();
        let code = version.fault_code(self.code);
        let code_text = format!("{}:{}", prefix, code.local);
        let mut out = Vec::new();
        let fault = StartElement::new(ns, "Fault", prefix);
        out.push(Token::StartElement(fault.clone()));

        match version {
            SoapVersion::Soap11 => {
                push_text_element(&mut out, StartElement::new("", "faultcode", ""), &code_text);
                push_text_element(&mut out, StartElement::new("", "faultstring", ""), &self.reason);
                if let Some(actor) = &self.actor {
                    push_text_element(&mut out, StartElement::new("", "faultactor", ""), actor);
                }
                if !self.detail.is_empty() {
                    push_wrapped(&mut out, StartElement::new("", "detail", ""), &self.detail);
                }
            }
            SoapVersion::Soap12 => {
                let code_el = StartElement::new(ns, "Code", prefix);
                out.push(Token::StartElement(code_el.clone()));
                push_text_element(&mut out, StartElement::new(ns, "Value", prefix), &code_text);
                out.push(Token::EndElement(code_el.end()));

                let reason_el = StartElement::new(ns, "Reason", prefix);
                out.push(Token::StartElement(reason_el.clone()));
                let text = StartElement::new(ns, "Text", prefix).with_attribute(Attribute::new(XML_NS, "lang", "xml", "en"));
                push_text_element(&mut out, text, &self.reason);
                out.push(Token::EndElement(reason_el.end()));

                if let Some(node) = &self.node {
                    push_text_element(&mut out, StartElement::new(ns, "Node", prefix), node);
                }
                if let Some(role) = &self.actor {
                    push_text_element(&mut out, StartElement::new(ns, "Role", prefix), role);
                }
                if !self.detail.is_empty() {
                    push_wrapped(&mut out, StartElement::new(ns, "Detail", prefix), &self.detail);
                }
            }
        }

        out.push(Token::EndElement(fault.end()));
        out
    }

    /// 1.2 `NotUnderstood` header blocks, one per offending header.
    pub fn not_understood_headers(&self, version: SoapVersion, prefix: &str) -> Result<Vec<Header>, SoapError> {
        if version != SoapVersion::Soap12 {
            return Ok(Vec::new());
        }
        self.not_understood
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let start = StartElement::new(version.namespace(), "NotUnderstood", prefix);
                // An unprefixed qname resolves through the default namespace,
                // so it is reset for names without one.
                let start = if name.namespace.is_empty() {
                    start
                        .with_decl("", "")
                        .with_attribute(Attribute::local("qname", name.local.clone()))
                } else {
                    let qname_prefix = format!("abc{}", i + 1);
                    start
                        .with_decl(&qname_prefix, &name.namespace)
                        .with_attribute(Attribute::local("qname", format!("{}:{}", qname_prefix, name.local)))
                };
                let end = start.end();
                Header::parse(version, vec![Token::StartElement(start), Token::EndElement(end)])
            })
            .collect()
    }

    /// Parse a Fault element (tokens start at `<Fault>`).
    pub fn from_tokens(version: SoapVersion, tokens: &[Token]) -> Result<Self, SoapError> {
        if !matches!(tokens.first(), Some(Token::StartElement(s)) if s.is(version.namespace(), "Fault")) {
            return Err(SoapError::InvalidEnvelope("payload is not a SOAP Fault".to_string()));
        }

        let mut fault = SoapFault::new(FaultCode::Receiver, "");
        let mut code_local: Option<String> = None;

        for (child, inner) in children(tokens) {
            match (version, child.local_name.as_str()) {
                (SoapVersion::Soap11, "faultcode") => code_local = Some(text_of(inner)),
                (SoapVersion::Soap11, "faultstring") => fault.reason = text_of(inner),
                (SoapVersion::Soap11, "faultactor") => fault.actor = Some(text_of(inner)),
                (SoapVersion::Soap11, "detail") => fault.detail = strip_outer(inner),
                (SoapVersion::Soap12, "Code") => {
                    let code_tokens = wrap(&child, inner);
                    if let Some((_, value)) = children(&code_tokens).into_iter().find(|(c, _)| c.local_name == "Value") {
                        code_local = Some(text_of(value));
                    }
                }
                (SoapVersion::Soap12, "Reason") => {
                    let reason_tokens = wrap(&child, inner);
                    if let Some((_, text)) = children(&reason_tokens).into_iter().find(|(c, _)| c.local_name == "Text") {
                        fault.reason = text_of(text);
                    }
                }
                (SoapVersion::Soap12, "Node") => fault.node = Some(text_of(inner)),
                (SoapVersion::Soap12, "Role") => fault.actor = Some(text_of(inner)),
                (SoapVersion::Soap12, "Detail") => fault.detail = strip_outer(inner),
                _ => {}
            }
        }

        let code_local = code_local
            .ok_or_else(|| SoapError::InvalidEnvelope("SOAP Fault has no fault code".to_string()))?;
        let local = code_local.rsplit(':').next().unwrap_or(&code_local).trim();
        fault.code = version
            .fault_code_from_local(local)
            .ok_or_else(|| SoapError::InvalidEnvelope(format!("unknown fault code {}", code_local)))?;
        Ok(fault)
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.reason)
    }
}

fn push_text_element(out: &mut Vec<Token>, start: StartElement, text: &str) {
    let end = start.end();
    out.push(Token::StartElement(start));
    out.push(Token::Text(text.to_string()));
    out.push(Token::EndElement(end));
}

fn push_wrapped(out: &mut Vec<Token>, start: StartElement, inner: &[Token]) {
    let end = start.end();
    out.push(Token::StartElement(start));
    out.extend(inner.iter().cloned());
    out.push(Token::EndElement(end));
}

/// Direct children of the element opened by `tokens[0]`, each with the
/// tokens strictly inside it.
fn children(tokens: &[Token]) -> Vec<(StartElement, &[Token])> {
    let mut result = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(StartElement, usize)> = None;
    for (i, token) in tokens.iter().enumerate().skip(1) {
        match token {
            Token::StartElement(s) => {
                if depth == 0 {
                    open = Some((s.clone(), i + 1));
                }
                depth += 1;
            }
            Token::EndElement(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some((start, from)) = open.take() {
                        result.push((start, &tokens[from..i]));
                    }
                }
            }
            _ => {}
        }
    }
    result
}

fn wrap(start: &StartElement, inner: &[Token]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(inner.len() + 2);
    push_wrapped(&mut tokens, start.clone(), inner);
    tokens
}

fn strip_outer(inner: &[Token]) -> Vec<Token> {
    inner.iter().filter(|t| !t.is_ignorable()).cloned().collect()
}

fn text_of(inner: &[Token]) -> String {
    inner
        .iter()
        .filter_map(|t| match t {
            Token::Text(s) | Token::CData(s) => Some(s.as_str()),
            _ => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SOAP_12_NS;
    use crate::writer::tokens_to_string;

    #[test]
    fn test_soap_11_fault_shape() {
        let fault = SoapFault::sender("bad request");
        let tokens = fault.to_tokens(SoapVersion::Soap11, "S");
        let names: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::StartElement(s) => Some(s.qualified_name()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["S:Fault", "faultcode", "faultstring"]);
        assert!(tokens.contains(&Token::Text("S:Client".to_string())));
    }

    #[test]
    fn test_soap_11_actor_only_when_present() {
        let fault = SoapFault::receiver("oops").with_actor("urn:actor");
        let tokens = fault.to_tokens(SoapVersion::Soap11, "S");
        assert!(tokens.iter().any(|t| matches!(t, Token::StartElement(s) if s.local_name == "faultactor")));
    }

    #[test]
    fn test_soap_12_fault_round_trip() {
        let detail = vec![
            Token::StartElement(StartElement::new("urn:d", "Why", "d").with_decl("d", "urn:d")),
            Token::Text("because".to_string()),
            Token::EndElement(StartElement::new("urn:d", "Why", "d").end()),
        ];
        let fault = SoapFault::receiver("server broke").with_actor("urn:role").with_detail(detail.clone());
        let tokens = fault.to_tokens(SoapVersion::Soap12, "env");
        let parsed = SoapFault::from_tokens(SoapVersion::Soap12, &tokens).unwrap();
        assert_eq!(parsed.code, FaultCode::Receiver);
        assert_eq!(parsed.reason, "server broke");
        assert_eq!(parsed.actor.as_deref(), Some("urn:role"));
        assert_eq!(parsed.detail, detail);
    }

    #[test]
    fn test_soap_11_fault_round_trip() {
        let fault = SoapFault::must_understand(vec![QName::new("urn:h", "Tx")]);
        let tokens = fault.to_tokens(SoapVersion::Soap11, "soapenv");
        let parsed = SoapFault::from_tokens(SoapVersion::Soap11, &tokens).unwrap();
        assert_eq!(parsed.code, FaultCode::MustUnderstand);
        assert!(parsed.reason.contains("{urn:h}Tx"));
    }

    #[test]
    fn test_not_understood_blocks_only_for_12() {
        let fault = SoapFault::must_understand(vec![QName::new("urn:a", "A"), QName::new("urn:b", "B")]);
        assert!(fault.not_understood_headers(SoapVersion::Soap11, "S").unwrap().is_empty());
        let headers = fault.not_understood_headers(SoapVersion::Soap12, "env").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name(), &QName::new(SOAP_12_NS, "NotUnderstood"));
        assert_eq!(headers[1].attribute("", "qname"), Some("abc2:B"));
    }

    #[test]
    fn test_not_understood_without_namespace_is_unprefixed() {
        let fault = SoapFault::must_understand(vec![QName::new("", "A")]);
        let headers = fault.not_understood_headers(SoapVersion::Soap12, "env").unwrap();
        assert_eq!(headers[0].attribute("", "qname"), Some("A"));
        let xml = tokens_to_string(headers[0].tokens()).unwrap();
        assert!(!xml.contains("xmlns:abc"), "{xml}");
        assert!(xml.contains(r#"xmlns="""#), "{xml}");
    }

    #[test]
    fn test_from_tokens_rejects_non_fault() {
        let tokens = vec![Token::StartElement(StartElement::new("urn:x", "GetUser", "x"))];
        assert!(SoapFault::from_tokens(SoapVersion::Soap11, &tokens).is_err());
    }
}
