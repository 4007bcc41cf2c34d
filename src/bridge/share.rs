// src/bridge/share.rs

use crate::constants::{MAX_SHARE_BYTES, MAX_SINGLE_STREAM_BYTES, MAX_SUMMARY_CHARS};
use crate::error::{BridgeError, Result};
use crate::network::message::{ShareItem, SharePayload};
use base64::Engine;
use std::path::{Path, PathBuf};

impl SharePayload {
    /// Plain text share.
    pub fn text(subject: Option<String>, text: impl Into<String>) -> Self {
        SharePayload {
            mime: "text/plain".into(),
            subject,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Build a share carrying `files` inline (base64).
    ///
    /// Every file is capped individually and the sum is capped too. The whole
    /// `share` line must also fit in `max_line_bytes`, the line limit the
    /// receiving server enforces. Sizes are checked before anything is read.
    pub async fn from_files(
        files: &[PathBuf],
        mime: Option<String>,
        subject: Option<String>,
        text: Option<String>,
        max_line_bytes: usize,
    ) -> Result<Self> {
        let mut total = 0u64;
        let mut encoded = 0u64;
        for path in files {
            let size = tokio::fs::metadata(path).await?.len();
            total += size;
            encoded += base64_len(size);
            if size > MAX_SINGLE_STREAM_BYTES
                || total > MAX_SHARE_BYTES
                || encoded > max_line_bytes as u64
            {
                return Err(BridgeError::ShareTooLarge {
                    name: path.display().to_string(),
                    size,
                });
            }
        }

        let mut items = Vec::with_capacity(files.len());
        for path in files {
            items.push(read_item(path).await?);
        }
        let mime = mime.unwrap_or_else(|| {
            if items.is_empty() {
                "text/plain".into()
            } else {
                "*/*".into()
            }
        });
        let payload = SharePayload {
            mime,
            subject,
            text,
            html: None,
            has_streams: !items.is_empty(),
            items,
        };
        let line_len = payload.line_len()?;
        if line_len > max_line_bytes {
            return Err(BridgeError::ShareTooLarge {
                name: payload.summary().unwrap_or_else(|| "payload".into()),
                size: line_len as u64,
            });
        }
        Ok(payload)
    }

    /// True when there is nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.text.is_none() && self.html.is_none()
    }

    /// Short label: subject, else the start of the text, else the first item's name.
    pub fn summary(&self) -> Option<String> {
        if let Some(subject) = self.subject.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(subject.to_string());
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Some(text.chars().take(MAX_SUMMARY_CHARS).collect());
        }
        self.items
            .first()
            .and_then(|i| i.display_name.as_deref())
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
    }
}

impl ShareItem {
    /// Decoded attachment bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| BridgeError::MalformedMessage(format!("share item data: {}", e)))
    }
}

fn base64_len(size: u64) -> u64 {
    size.div_ceil(3) * 4
}

async fn read_item(path: &Path) -> Result<ShareItem> {
    let bytes = tokio::fs::read(path).await?;
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let uri = std::fs::canonicalize(path)
        .ok()
        .map(|p| format!("file://{}", p.display()));
    Ok(ShareItem {
        uri,
        display_name,
        mime: None,
        size: bytes.len() as u64,
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::constants::DEFAULT_MAX_MESSAGE_BYTES;

    #[tokio::test]
    async fn builds_items_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hello share").unwrap();
        let payload = SharePayload::from_files(&[path], None, None, None, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap();
        assert!(payload.has_streams);
        assert_eq!(payload.mime, "*/*");
        let item = &payload.items[0];
        assert_eq!(item.display_name.as_deref(), Some("note.txt"));
        assert_eq!(item.size, 11);
        assert_eq!(item.decode().unwrap(), b"hello share");
        assert!(item.uri.as_deref().unwrap().starts_with("file://"));
        assert_eq!(payload.summary().as_deref(), Some("note.txt"));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = SharePayload::from_files(
            &[PathBuf::from("/definitely/not/here")],
            None,
            None,
            None,
            DEFAULT_MAX_MESSAGE_BYTES,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }

    #[tokio::test]
    async fn share_must_fit_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, vec![7u8; 3000]).unwrap();
        let files = [path];

        let fits = SharePayload::from_files(&files, None, None, None, DEFAULT_MAX_MESSAGE_BYTES)
            .await
            .unwrap();
        let exact = fits.line_len().unwrap();
        assert!(exact > 4000);

        let at_cap = SharePayload::from_files(&files, None, None, None, exact).await.unwrap();
        assert_eq!(at_cap, fits);

        let over = SharePayload::from_files(&files, None, None, None, exact - 1)
            .await
            .unwrap_err();
        assert!(matches!(over, BridgeError::ShareTooLarge { .. }));

        // refused from the size alone, before reading
        let early = SharePayload::from_files(&files, None, None, None, 3999)
            .await
            .unwrap_err();
        assert!(matches!(early, BridgeError::ShareTooLarge { size: 3000, .. }));
    }

    #[test]
    fn summary_prefers_subject_then_text() {
        let mut p = SharePayload::text(Some("Subject".into()), "body");
        assert_eq!(p.summary().as_deref(), Some("Subject"));
        p.subject = Some("   ".into());
        assert_eq!(p.summary().as_deref(), Some("body"));
        p.text = Some("x".repeat(500));
        assert_eq!(p.summary().unwrap().chars().count(), MAX_SUMMARY_CHARS);
        assert!(!p.is_empty());
        assert!(SharePayload::default().is_empty());
        assert_eq!(SharePayload::default().summary(), None);
    }
}
