//! Streaming SOAP envelope codec
//!
//! Reads and writes SOAP 1.1 and 1.2 envelopes without materializing the
//! body payload, and negotiates the wire encoding with the peer.
//!
//! # Features
//!
//! - Streaming decode: headers are captured, the payload is read on demand
//! - Hybrid reader stitching an in-memory envelope around a streamed payload
//! - Deferred-element writer that builds an envelope tree from write events
//! - `mustUnderstand` processing with SOAP 1.2 `NotUnderstood` fault headers
//! - SOAP with attachments and MTOM/XOP packaging
//! - Binary XML encoding with optimistic/pessimistic content negotiation
//!
//! # Example
//!
//! ```ignore
//! use zentinel_soap_codec::{Codec, CodecConfig, Message, SoapBindingCodec, SoapVersion};
//!
//! let codec = SoapBindingCodec::new(&CodecConfig::default());
//! let message = Message::from_payload_xml(SoapVersion::Soap11, "<m:Ping xmlns:m=\"urn:m\"/>")?;
//! let mut packet = codec.create_packet(message);
//! let mut wire = Vec::new();
//! let content_type = codec.encode(&mut packet, &mut wire)?;
//! ```

pub mod attachment;
pub mod binary;
pub mod codec;
pub mod config;
pub mod content_type;
pub mod cursor;
pub mod deferred;
pub mod error;
pub mod fault;
pub mod header;
pub mod hybrid;
pub mod message;
pub mod mime;
pub mod mtom;
pub mod negotiation;
pub mod packet;
pub mod stream;
pub mod tag;
pub mod tree;
pub mod version;
pub mod writer;

pub use attachment::{Attachment, AttachmentSet};
pub use codec::{Codec, ContentType};
pub use config::CodecConfig;
pub use cursor::{Token, XmlCursor};
pub use deferred::DeferredElementWriter;
pub use error::SoapError;
pub use fault::{FaultCode, SoapFault};
pub use header::{Header, HeaderList};
pub use hybrid::HybridReader;
pub use message::{Message, PayloadSource};
pub use negotiation::SoapBindingCodec;
pub use packet::{NegotiationMode, Packet, WireEncoding};
pub use stream::StreamSoapCodec;
pub use tag::{QName, TagInfoset};
pub use version::SoapVersion;
