//! Configuration types for the SOAP codec.

use crate::error::SoapError;
use crate::packet::NegotiationMode;
use crate::tag::QName;
use crate::version::SoapVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main configuration for the SOAP codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// SOAP version messages are decoded and encoded with
    pub soap_version: SoapVersion,

    /// Optional wire encodings
    pub features: FeaturesConfig,

    /// Header processing
    pub headers: HeadersConfig,

    /// Binary XML negotiation defaults
    pub negotiation: NegotiationConfig,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            soap_version: SoapVersion::default(),
            features: FeaturesConfig::default(),
            headers: HeadersConfig::default(),
            negotiation: NegotiationConfig::default(),
        }
    }
}

impl CodecConfig {
    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, SoapError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SoapError> {
        serde_yaml::from_str(content).map_err(|e| SoapError::Config(e.to_string()))
    }
}

/// Optional wire encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Package attachments as MTOM/XOP
    pub mtom: bool,

    /// Allow the binary XML encoding at all
    pub binary_xml: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            mtom: false,
            binary_xml: true,
        }
    }
}

/// Header processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Reject messages with mandatory headers nobody understands
    pub check_must_understand: bool,

    /// Roles this node plays in addition to the version's required ones
    pub roles: Vec<String>,

    /// Headers the application processes, in `{namespace}local` form
    pub understood: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            check_must_understand: true,
            roles: Vec::new(),
            understood: Vec::new(),
        }
    }
}

impl HeadersConfig {
    pub fn understood_names(&self) -> HashSet<QName> {
        self.understood.iter().map(|s| QName::parse(s)).collect()
    }
}

/// Binary XML negotiation defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Mode for outbound client packets
    pub mode: NegotiationMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CodecConfig::default();
        assert_eq!(config.soap_version, SoapVersion::Soap11);
        assert!(config.features.binary_xml);
        assert!(!config.features.mtom);
        assert!(config.headers.check_must_understand);
        assert_eq!(config.negotiation.mode, NegotiationMode::None);
    }

    #[test]
    fn test_config_serialization() {
        let config = CodecConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.lines().next().is_some_and(|l| l.starts_with("soap_version:")), "{yaml}");
        let parsed: CodecConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.soap_version, config.soap_version);
        assert_eq!(parsed.features.binary_xml, config.features.binary_xml);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
soap_version: "1.2"
features:
  mtom: true
headers:
  roles:
    - "urn:example:gateway"
  understood:
    - "{urn:example:tx}Transaction"
negotiation:
  mode: optimistic
"#;
        let config = CodecConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.soap_version, SoapVersion::Soap12);
        assert!(config.features.mtom);
        assert!(config.features.binary_xml);
        assert_eq!(config.headers.roles.len(), 1);
        assert!(config
            .headers
            .understood_names()
            .contains(&QName::new("urn:example:tx", "Transaction")));
        assert_eq!(config.negotiation.mode, NegotiationMode::Optimistic);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = CodecConfig::from_yaml("soap_version: \"3.0\"").unwrap_err();
        assert!(matches!(err, SoapError::Config(_)));
    }
}
