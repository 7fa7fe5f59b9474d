//! Binary attachments keyed by content-id.
//!
//! Attachment data is shared between the message and whoever supplied it;
//! cloning an [`AttachmentSet`] never copies the bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A single MIME part carried next to the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    content_id: String,
    content_type: String,
    data: Arc<[u8]>,
}

impl Attachment {
    pub fn new(content_id: &str, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_id: normalize_content_id(content_id),
            content_type: content_type.into(),
            data: Arc::from(data.into()),
        }
    }

    /// Content-id without angle brackets or `cid:` scheme.
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fresh reader over the data.
    pub fn reader(&self) -> io::Cursor<Arc<[u8]>> {
        io::Cursor::new(Arc::clone(&self.data))
    }

    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.data)
    }

    /// Persist the data to `path`.
    pub fn move_to(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, &self.data)?;
        debug!(content_id = %self.content_id, path = %path.display(), "Attachment written to file");
        Ok(())
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// Strip `cid:`, surrounding angle brackets and percent-encoding.
pub fn normalize_content_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.get(..4) {
        Some(scheme) if scheme.eq_ignore_ascii_case("cid:") => &trimmed[4..],
        _ => trimmed,
    };
    let bare = without_scheme.trim_start_matches('<').trim_end_matches('>');
    percent_decode_str(bare).decode_utf8_lossy().into_owned()
}

/// Attachments of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentSet {
    parts: Vec<Arc<Attachment>>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attachment: Attachment) {
        self.parts.push(Arc::new(attachment));
    }

    /// Lookup by content-id in any of its textual forms.
    pub fn get(&self, content_id: &str) -> Option<&Attachment> {
        let wanted = normalize_content_id(content_id);
        self.parts
            .iter()
            .find(|a| a.content_id == wanted)
            .map(|a| a.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.parts.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Release this set's hold on the attachment data.
    pub fn close(&mut self) {
        if !self.parts.is_empty() {
            debug!(count = self.parts.len(), "Releasing attachments");
        }
        self.parts.clear();
    }
}

impl FromIterator<Attachment> for AttachmentSet {
    fn from_iter<I: IntoIterator<Item = Attachment>>(iter: I) -> Self {
        Self {
            parts: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_content_id_forms() {
        assert_eq!(normalize_content_id("<part1@example.org>"), "part1@example.org");
        assert_eq!(normalize_content_id("cid:part1%40example.org"), "part1@example.org");
        assert_eq!(normalize_content_id("CID:<x>"), "x");
        assert_eq!(normalize_content_id("plain%"), "plain%");
    }

    #[test]
    fn test_content_id_escapes() {
        assert_eq!(normalize_content_id("cid:a%40b"), "a@b");
        assert_eq!(normalize_content_id("cid:part%40"), "part@");
        assert_eq!(normalize_content_id("cid:%3Croot%3E%20x"), "<root> x");
        assert_eq!(normalize_content_id("cid:bad%zz"), "bad%zz");
    }

    #[test]
    fn test_lookup_and_shared_data() {
        let mut set = AttachmentSet::new();
        set.add(Attachment::new("<img@x>", "image/png", vec![1u8, 2, 3]));
        let copy = set.clone();
        assert_eq!(copy.get("cid:img@x").map(|a| a.len()), Some(3));
        assert!(set.get("missing").is_none());

        let mut buf = Vec::new();
        copy.get("img@x").unwrap().reader().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_close_releases_parts() {
        let mut set: AttachmentSet = vec![Attachment::new("a", "text/plain", "hello")].into_iter().collect();
        assert_eq!(set.get("a").unwrap().to_base64(), "aGVsbG8=");
        set.close();
        assert!(set.is_empty());
    }

    #[test]
    fn test_move_to_file() {
        let path = std::env::temp_dir().join(format!("zentinel-att-{}.bin", uuid::Uuid::new_v4()));
        let attachment = Attachment::new("f", "application/octet-stream", vec![9u8; 16]);
        attachment.move_to(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![9u8; 16]);
        std::fs::remove_file(&path).unwrap();
    }
}
