use linkfetch_core::{FailureKind, Payload};

use crate::decode::decode_body;
use crate::{FetchError, FetchedPage};

/// Turns a fetched page into the structured result stored for a work item.
///
/// Returning [`Payload::Empty`] marks a well-formed page with nothing to
/// extract; it is a terminal success and is not retried. Errors are terminal
/// failures.
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &FetchedPage) -> Result<Payload, FetchError>;
}

/// Default extractor: the decoded UTF-8 text of the page.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, page: &FetchedPage) -> Result<Payload, FetchError> {
        let decoded = decode_body(&page.bytes, page.content_type.as_deref())
            .map_err(|err| FetchError::new(FailureKind::Extraction, err.to_string()))?;
        if decoded.text.trim().is_empty() {
            Ok(Payload::Empty)
        } else {
            Ok(Payload::Data(decoded.text.into_bytes()))
        }
    }
}
