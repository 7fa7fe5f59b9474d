//! Error types for the SOAP codec.

use crate::fault::SoapFault;
use crate::tag::QName;
use crate::version::SoapVersion;
use thiserror::Error;

/// SOAP codec errors.
///
/// Structural and protocol errors (`XmlParse`, `InvalidEnvelope`,
/// `VersionMismatch`, `MustUnderstand`) are turned into [`SoapError::Fault`]
/// at the decode boundary by [`SoapError::into_fault`]. `AlreadyConsumed` is
/// an internal invariant violation and is never wrapped.
#[derive(Error, Debug)]
pub enum SoapError {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("SOAP version mismatch: expected envelope namespace {expected}, found {found:?}")]
    VersionMismatch { expected: String, found: String },

    #[error("MustUnderstand headers [{}] are not understood", format_names(.headers))]
    MustUnderstand { headers: Vec<QName> },

    #[error("Unsupported content type {content_type:?}, expected one of: {}", .expected.join(", "))]
    UnsupportedMediaType {
        content_type: String,
        expected: Vec<String>,
    },

    #[error("Payload has already been consumed; first consumed at:\n{consumed_at}")]
    AlreadyConsumed { consumed_at: String },

    #[error("SOAP fault: {0}")]
    Fault(Box<SoapFault>),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Binary XML error: {0}")]
    BinaryXml(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_names(names: &[QName]) -> String {
    names.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl From<quick_xml::Error> for SoapError {
    fn from(e: quick_xml::Error) -> Self {
        SoapError::XmlParse(e.to_string())
    }
}

impl SoapError {
    /// Invariant violations that must reach the caller unwrapped.
    pub fn is_internal(&self) -> bool {
        matches!(self, SoapError::AlreadyConsumed { .. })
    }

    /// Convert structural/protocol errors into the SOAP fault they imply.
    pub fn into_fault(self) -> SoapError {
        let fault = match self {
            SoapError::XmlParse(msg) | SoapError::InvalidEnvelope(msg) => SoapFault::sender(msg),
            SoapError::VersionMismatch { expected, found } => SoapFault::version_mismatch(&expected, &found),
            SoapError::MustUnderstand { headers } => SoapFault::must_understand(headers),
            other => return other,
        };
        SoapError::Fault(Box::new(fault))
    }

    /// The fault carried by this error, if any.
    pub fn fault(&self) -> Option<&SoapFault> {
        match self {
            SoapError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    pub(crate) fn version_mismatch(expected: SoapVersion, found: &str) -> Self {
        SoapError::VersionMismatch {
            expected: expected.namespace().to_string(),
            found: found.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultCode;

    #[test]
    fn test_parse_error_becomes_sender_fault() {
        let err = SoapError::XmlParse("bad".to_string()).into_fault();
        assert_eq!(err.fault().map(|f| f.code), Some(FaultCode::Sender));
    }

    #[test]
    fn test_must_understand_keeps_all_names() {
        let err = SoapError::MustUnderstand {
            headers: vec![QName::new("urn:a", "A"), QName::new("urn:b", "B")],
        };
        assert_eq!(err.to_string(), "MustUnderstand headers [{urn:a}A, {urn:b}B] are not understood");
        let fault = err.into_fault();
        assert_eq!(fault.fault().unwrap().not_understood.len(), 2);
    }

    #[test]
    fn test_internal_errors_pass_through() {
        let err = SoapError::AlreadyConsumed {
            consumed_at: "here".to_string(),
        };
        assert!(err.is_internal());
        assert!(matches!(err.into_fault(), SoapError::AlreadyConsumed { .. }));
    }

    #[test]
    fn test_unsupported_media_lists_expected() {
        let err = SoapError::UnsupportedMediaType {
            content_type: "image/png".to_string(),
            expected: vec!["text/xml".to_string(), "multipart/related".to_string()],
        };
        assert!(err.to_string().contains("text/xml, multipart/related"));
    }
}
