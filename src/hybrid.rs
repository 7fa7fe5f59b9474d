//! Envelope reader that switches between an in-memory tree and a live
//! payload cursor.
//!
//! Envelope, Header and the Body start tag come from the tree. Right after
//! the Body start tag the reader hands over to the payload cursor, and when
//! that cursor runs dry it returns to the tree for the Body and Envelope end
//! tags. Every call dispatches on the current state in one place.

use crate::cursor::{NamespaceScope, Token, XmlCursor};
use crate::error::SoapError;
use crate::tree::{NodeId, SoapDocument, TreeCursor};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Tree,
    Payload,
}

pub struct HybridReader {
    state: ReaderState,
    tree: TreeCursor,
    body: NodeId,
    payload: Box<dyn XmlCursor>,
    /// The Body start tag was the last token returned.
    at_body_start: bool,
}

impl HybridReader {
    pub fn new(document: SoapDocument, payload: Box<dyn XmlCursor>) -> Self {
        let body = document.body();
        Self {
            state: ReaderState::Tree,
            tree: document.into_cursor(),
            body,
            payload,
            at_body_start: false,
        }
    }

    /// Whether tokens currently come from the payload cursor.
    pub fn in_payload(&self) -> bool {
        self.state == ReaderState::Payload
    }

    fn next_from_tree(&mut self) -> Result<Option<Token>, SoapError> {
        let token = self.tree.next_token()?;
        self.at_body_start =
            matches!(token, Some(Token::StartElement(_))) && self.tree.last_node() == Some(self.body);
        Ok(token)
    }
}

impl XmlCursor for HybridReader {
    fn next_token(&mut self) -> Result<Option<Token>, SoapError> {
        if self.at_body_start {
            self.at_body_start = false;
            self.state = ReaderState::Payload;
            trace!("Switching to payload cursor");
        }
        match self.state {
            ReaderState::Payload => match self.payload.next_token()? {
                Some(token) => Ok(Some(token)),
                None => {
                    self.state = ReaderState::Tree;
                    trace!("Payload exhausted, back to envelope tree");
                    self.next_from_tree()
                }
            },
            ReaderState::Tree => self.next_from_tree(),
        }
    }

    fn namespace_scope(&self) -> &NamespaceScope {
        match self.state {
            ReaderState::Tree => self.tree.namespace_scope(),
            ReaderState::Payload => self.payload.namespace_scope(),
        }
    }
}
