use async_trait::async_trait;
use thiserror::Error;

pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("attachments of type `{0}` are not supported")]
    Unsupported(String),
    #[error("attachment could not be read: {0}")]
    Unreadable(String),
    #[error("attachment contains no text")]
    Empty,
    #[error("attachment is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Attachment-to-text collaborator. Image OCR plugs in behind this trait.
#[async_trait]
pub trait AttachmentExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<String, ExtractionError>;
}

/// Accepts UTF-8 text attachments (`text/*`, JSON, or an unlabeled upload).
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl AttachmentExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<String, ExtractionError> {
        let essence = media_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        let textual = essence.is_empty()
            || essence.starts_with("text/")
            || essence == "application/json"
            || essence == "application/octet-stream";
        if !textual {
            return Err(ExtractionError::Unsupported(essence));
        }
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(ExtractionError::TooLarge { size: bytes.len(), limit: MAX_ATTACHMENT_BYTES });
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|error| ExtractionError::Unreadable(error.to_string()))?
            .trim_start_matches('\u{feff}')
            .trim();
        if text.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{AttachmentExtractor, ExtractionError, PlainTextExtractor};

    #[tokio::test]
    async fn plain_text_is_extracted_and_trimmed() {
        let text = PlainTextExtractor
            .extract("\u{feff}  Box arrived crushed on one corner.\n".as_bytes(), "text/plain; charset=utf-8")
            .await
            .expect("text");
        assert_eq!(text, "Box arrived crushed on one corner.");
    }

    #[tokio::test]
    async fn images_invalid_bytes_and_blank_files_are_rejected() {
        let extractor = PlainTextExtractor;
        assert_eq!(
            extractor.extract(&[0x89, 0x50], "image/png").await,
            Err(ExtractionError::Unsupported("image/png".to_owned()))
        );
        assert!(matches!(
            extractor.extract(&[0xff, 0xfe, 0xfd], "text/plain").await,
            Err(ExtractionError::Unreadable(_))
        ));
        assert_eq!(extractor.extract(b"   \n", "").await, Err(ExtractionError::Empty));
    }
}
