//! Per-version SOAP constants.
//!
//! SOAP 1.1 and 1.2 differ in namespaces, header attribute names, default
//! roles, fault-code vocabulary and media types. Everything that varies is
//! data on [`SoapVersion`]; the codecs branch on it in a handful of places.

use crate::fault::FaultCode;
use crate::tag::QName;
use serde::{Deserialize, Serialize};

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// The `xml:` prefix namespace, always in scope.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// XOP include namespace used by MTOM.
pub const XOP_NS: &str = "http://www.w3.org/2004/08/xop/include";

/// SOAP 1.1 `next` actor.
pub const SOAP_11_ACTOR_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";
/// SOAP 1.2 well-known roles.
pub const SOAP_12_ROLE_NEXT: &str = "http://www.w3.org/2003/05/soap-envelope/role/next";
pub const SOAP_12_ROLE_ULTIMATE_RECEIVER: &str =
    "http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver";
pub const SOAP_12_ROLE_NONE: &str = "http://www.w3.org/2003/05/soap-envelope/role/none";

/// Media types.
pub const SOAP_11_CONTENT_TYPE: &str = "text/xml";
pub const SOAP_12_CONTENT_TYPE: &str = "application/soap+xml";
/// Version-neutral FastInfoset type, also used as the multipart root type.
pub const FAST_INFOSET_CONTENT_TYPE: &str = "application/fastinfoset";
pub const SOAP_11_BINARY_CONTENT_TYPE: &str = FAST_INFOSET_CONTENT_TYPE;
pub const SOAP_12_BINARY_CONTENT_TYPE: &str = "application/soap+fastinfoset";
pub const XOP_CONTENT_TYPE: &str = "application/xop+xml";
pub const MULTIPART_RELATED: &str = "multipart/related";

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[default]
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace URI.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    /// Version whose envelope lives in `ns`, if any.
    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// Prefix used when synthesizing envelope tags.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            Self::Soap11 => "S",
            Self::Soap12 => "env",
        }
    }

    /// Plain XML media type.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_CONTENT_TYPE,
            Self::Soap12 => SOAP_12_CONTENT_TYPE,
        }
    }

    /// Binary XML media type.
    pub fn binary_content_type(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_BINARY_CONTENT_TYPE,
            Self::Soap12 => SOAP_12_BINARY_CONTENT_TYPE,
        }
    }

    /// Local name of the role attribute (`actor` in 1.1).
    pub fn role_attribute(&self) -> &'static str {
        match self {
            Self::Soap11 => "actor",
            Self::Soap12 => "role",
        }
    }

    /// Local name of the relay attribute; 1.1 has none.
    pub fn relay_attribute(&self) -> Option<&'static str> {
        match self {
            Self::Soap11 => None,
            Self::Soap12 => Some("relay"),
        }
    }

    /// Whether header attributes may appear without the envelope namespace.
    ///
    /// SOAP 1.1 processors in the wild emit bare `mustUnderstand`/`actor`.
    pub fn accepts_unqualified_header_attributes(&self) -> bool {
        matches!(self, Self::Soap11)
    }

    /// Role assigned to a header that carries no role attribute.
    pub fn implicit_role(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_ACTOR_NEXT,
            Self::Soap12 => SOAP_12_ROLE_ULTIMATE_RECEIVER,
        }
    }

    /// Roles every node plays regardless of configuration.
    pub fn required_roles(&self) -> &'static [&'static str] {
        match self {
            Self::Soap11 => &[SOAP_11_ACTOR_NEXT],
            Self::Soap12 => &[SOAP_12_ROLE_NEXT, SOAP_12_ROLE_ULTIMATE_RECEIVER],
        }
    }

    /// Fault code QName for this version.
    pub fn fault_code(&self, code: FaultCode) -> QName {
        let local = match (self, code) {
            (Self::Soap11, FaultCode::Sender) => "Client",
            (Self::Soap11, FaultCode::Receiver) => "Server",
            (Self::Soap12, FaultCode::Sender) => "Sender",
            (Self::Soap12, FaultCode::Receiver) => "Receiver",
            (_, FaultCode::VersionMismatch) => "VersionMismatch",
            (_, FaultCode::MustUnderstand) => "MustUnderstand",
        };
        QName::new(self.namespace(), local)
    }

    /// Maps a fault-code local name back to a [`FaultCode`].
    pub fn fault_code_from_local(&self, local: &str) -> Option<FaultCode> {
        match (self, local) {
            (Self::Soap11, "Client") | (Self::Soap12, "Sender") => Some(FaultCode::Sender),
            (Self::Soap11, "Server") | (Self::Soap12, "Receiver") => Some(FaultCode::Receiver),
            (_, "VersionMismatch") => Some(FaultCode::VersionMismatch),
            (_, "MustUnderstand") => Some(FaultCode::MustUnderstand),
            _ => None,
        }
    }

    /// Short label, e.g. for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

impl std::fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SOAP {}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_round_trip() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            assert_eq!(SoapVersion::from_namespace(version.namespace()), Some(version));
        }
        assert_eq!(SoapVersion::from_namespace("urn:other"), None);
    }

    #[test]
    fn test_fault_code_vocabulary() {
        assert_eq!(SoapVersion::Soap11.fault_code(FaultCode::Sender).local, "Client");
        assert_eq!(SoapVersion::Soap12.fault_code(FaultCode::Sender).local, "Sender");
        assert_eq!(SoapVersion::Soap11.fault_code(FaultCode::Receiver).local, "Server");
        assert_eq!(
            SoapVersion::Soap12.fault_code_from_local("Receiver"),
            Some(FaultCode::Receiver)
        );
        assert_eq!(SoapVersion::Soap12.fault_code_from_local("Client"), None);
    }

    #[test]
    fn test_roles() {
        assert_eq!(SoapVersion::Soap12.implicit_role(), SOAP_12_ROLE_ULTIMATE_RECEIVER);
        assert!(SoapVersion::Soap11.required_roles().contains(&SOAP_11_ACTOR_NEXT));
        assert_eq!(SoapVersion::Soap11.relay_attribute(), None);
    }

    #[test]
    fn test_serde_names() {
        let v: SoapVersion = serde_yaml::from_str("\"1.2\"").unwrap();
        assert_eq!(v, SoapVersion::Soap12);
    }
}
