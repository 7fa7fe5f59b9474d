//! Writer that builds a [`SoapDocument`] from streaming write calls.
//!
//! A start element is held back until the next structural call so that
//! namespace declarations and attributes written after it can still shape
//! it. Only then is the namespace resolved and the node created. Envelope,
//! Header and Body already exist in the target document; writing them binds
//! to the existing node instead of creating a new one.

use crate::cursor::{Attribute, NamespaceDecl, StartElement, Token};
use crate::error::SoapError;
use crate::tree::{NodeId, NodeKind, SoapDocument};
use crate::version::SoapVersion;
use crate::writer::TokenSink;
use tracing::trace;

/// Start element whose creation is deferred.
#[derive(Debug, Clone)]
struct PendingElement {
    prefix: String,
    local_name: String,
    namespace_uri: Option<String>,
    namespace_decls: Vec<NamespaceDecl>,
    attributes: Vec<Attribute>,
}

impl PendingElement {
    /// Explicit namespace, then a declaration made on this element for its
    /// prefix, then whatever the prefix means at `parent`.
    fn resolve_namespace(&self, document: &SoapDocument, parent: Option<NodeId>) -> String {
        if let Some(uri) = &self.namespace_uri {
            return uri.clone();
        }
        if let Some(decl) = self.namespace_decls.iter().rev().find(|d| d.prefix == self.prefix) {
            return decl.uri.clone();
        }
        document
            .document()
            .lookup_namespace(parent, &self.prefix)
            .unwrap_or_default()
    }

    fn flush(self, document: &mut SoapDocument, parent: Option<NodeId>) -> Result<NodeId, SoapError> {
        let namespace_uri = self.resolve_namespace(document, parent);

        if let Some(part) = document.soap_part(parent, &namespace_uri, &self.local_name) {
            trace!(element = %self.local_name, "Binding to existing SOAP part");
            if let Some(existing) = document.document_mut().element_mut(part) {
                existing.prefix = self.prefix;
                for decl in self.namespace_decls {
                    existing.namespace_decls.retain(|d| d.prefix != decl.prefix);
                    existing.namespace_decls.push(decl);
                }
                for attribute in self.attributes {
                    existing.attributes.retain(|a| {
                        a.namespace_uri != attribute.namespace_uri || a.local_name != attribute.local_name
                    });
                    existing.attributes.push(attribute);
                }
            }
            return Ok(part);
        }
        if parent.is_none() {
            return Err(SoapError::InvalidEnvelope(format!(
                "document element must be {{{}}}Envelope, found {{{}}}{}",
                document.version().namespace(),
                namespace_uri,
                self.local_name
            )));
        }

        let mut element = StartElement {
            namespace_uri,
            local_name: self.local_name,
            prefix: self.prefix,
            namespace_decls: self.namespace_decls,
            attributes: self.attributes,
        };
        let declared = element.namespace_decls.iter().any(|d| d.prefix == element.prefix);
        let bound = document.document().lookup_namespace(parent, &element.prefix);
        let resolves = match bound.as_deref() {
            Some(uri) => uri == element.namespace_uri,
            None => element.namespace_uri.is_empty(),
        };
        if !declared && !resolves {
            element
                .namespace_decls
                .push(NamespaceDecl::new(element.prefix.clone(), element.namespace_uri.clone()));
        }
        Ok(document.document_mut().append(parent, NodeKind::Element(element)))
    }
}

pub struct DeferredElementWriter {
    document: SoapDocument,
    current: Option<NodeId>,
    pending: Option<PendingElement>,
}

impl DeferredElementWriter {
    /// Writer targeting a fresh document with pre-existing Envelope and Body.
    pub fn new(version: SoapVersion) -> Self {
        Self::with_document(SoapDocument::new(version))
    }

    pub fn with_document(document: SoapDocument) -> Self {
        Self {
            document,
            current: None,
            pending: None,
        }
    }

    /// Tree built so far. A pending element is not part of it yet.
    pub fn document(&self) -> &SoapDocument {
        &self.document
    }

    fn flush(&mut self) -> Result<(), SoapError> {
        if let Some(pending) = self.pending.take() {
            let id = pending.flush(&mut self.document, self.current)?;
            self.current = Some(id);
        }
        Ok(())
    }

    fn pending_mut(&mut self, what: &str) -> Result<&mut PendingElement, SoapError> {
        self.pending
            .as_mut()
            .ok_or_else(|| SoapError::XmlParse(format!("{} written outside of a start tag", what)))
    }

    /// Open an element. `namespace_uri` of `None` leaves resolution to the
    /// declarations that follow or to the enclosing scope.
    pub fn write_start_element(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: Option<&str>,
    ) -> Result<(), SoapError> {
        self.flush()?;
        self.pending = Some(PendingElement {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.map(str::to_string),
            namespace_decls: Vec::new(),
            attributes: Vec::new(),
        });
        Ok(())
    }

    pub fn write_namespace(&mut self, prefix: &str, uri: &str) -> Result<(), SoapError> {
        let pending = self.pending_mut("namespace declaration")?;
        pending.namespace_decls.retain(|d| d.prefix != prefix);
        pending.namespace_decls.push(NamespaceDecl::new(prefix, uri));
        Ok(())
    }

    pub fn write_default_namespace(&mut self, uri: &str) -> Result<(), SoapError> {
        self.write_namespace("", uri)
    }

    pub fn write_attribute(
        &mut self,
        prefix: &str,
        namespace_uri: &str,
        local_name: &str,
        value: &str,
    ) -> Result<(), SoapError> {
        let pending = self.pending_mut("attribute")?;
        pending
            .attributes
            .push(Attribute::new(namespace_uri, local_name, prefix, value));
        Ok(())
    }

    /// Bind `prefix` for the element being written, or for the open element
    /// when no start tag is pending.
    pub fn set_prefix(&mut self, prefix: &str, uri: &str) -> Result<(), SoapError> {
        if self.pending.is_some() {
            return self.write_namespace(prefix, uri);
        }
        let current = self
            .current
            .ok_or_else(|| SoapError::XmlParse("prefix bound outside of any element".to_string()))?;
        if let Some(element) = self.document.document_mut().element_mut(current) {
            element.namespace_decls.retain(|d| d.prefix != prefix);
            element.namespace_decls.push(NamespaceDecl::new(prefix, uri));
        }
        Ok(())
    }

    fn append_character_data(&mut self, kind: NodeKind, whitespace: bool) -> Result<(), SoapError> {
        self.flush()?;
        match self.current {
            // Whitespace around the envelope framing carries nothing
            Some(current) if whitespace && self.document.is_soap_part(current) => Ok(()),
            Some(current) => {
                self.document.document_mut().append(Some(current), kind);
                Ok(())
            }
            None if whitespace => Ok(()),
            None => Err(SoapError::XmlParse("character data outside of the document element".to_string())),
        }
    }

    pub fn write_characters(&mut self, text: &str) -> Result<(), SoapError> {
        let whitespace = text.chars().all(char::is_whitespace);
        self.append_character_data(NodeKind::Text(text.to_string()), whitespace)
    }

    pub fn write_cdata(&mut self, text: &str) -> Result<(), SoapError> {
        self.append_character_data(NodeKind::CData(text.to_string()), false)
    }

    pub fn write_comment(&mut self, text: &str) -> Result<(), SoapError> {
        self.flush()?;
        if let Some(current) = self.current {
            self.document
                .document_mut()
                .append(Some(current), NodeKind::Comment(text.to_string()));
        }
        Ok(())
    }

    pub fn write_end_element(&mut self) -> Result<(), SoapError> {
        self.flush()?;
        let current = self
            .current
            .ok_or_else(|| SoapError::XmlParse("end tag without matching start tag".to_string()))?;
        self.current = self.document.document().parent(current);
        Ok(())
    }

    /// Flush anything pending and close every open element.
    pub fn write_end_document(&mut self) -> Result<(), SoapError> {
        self.flush()?;
        self.current = None;
        Ok(())
    }

    pub fn finish(mut self) -> Result<SoapDocument, SoapError> {
        self.write_end_document()?;
        self.document.repair_part_prefixes();
        Ok(self.document)
    }
}

impl TokenSink for DeferredElementWriter {
    fn write_token(&mut self, token: &Token) -> Result<(), SoapError> {
        match token {
            Token::StartElement(start) => {
                self.write_start_element(&start.prefix, &start.local_name, Some(&start.namespace_uri))?;
                for decl in &start.namespace_decls {
                    self.write_namespace(&decl.prefix, &decl.uri)?;
                }
                for attr in &start.attributes {
                    self.write_attribute(&attr.prefix, &attr.namespace_uri, &attr.local_name, &attr.value)?;
                }
                Ok(())
            }
            Token::EndElement(_) => self.write_end_element(),
            Token::Text(text) => self.write_characters(text),
            Token::CData(text) => self.write_cdata(text),
            Token::Comment(text) => self.write_comment(text),
        }
    }
}
