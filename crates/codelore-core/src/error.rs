//! Typed errors that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`; these variants are raised
//! where a caller must react to the specific condition and are recovered
//! with `anyhow::Error::downcast_ref::<Error>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A document whose extension no extractor understands.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Retrieval found nothing and there is no conversation to fall back on.
    #[error("insufficient context: nothing in the project index matches this question")]
    InsufficientContext,

    /// An optional feature's backing table has not been migrated.
    #[error("table not found: {0}")]
    MissingTable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Returns true when `err` (or anything it wraps) is [`Error::MissingTable`].
pub fn is_missing_table(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<Error>(),
            Some(Error::MissingTable(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_detected_through_context() {
        let err = anyhow::Error::new(Error::MissingTable("document_chunks".into()))
            .context("searching documents");
        assert!(is_missing_table(&err));
    }

    #[test]
    fn other_errors_are_not_missing_table() {
        let err = anyhow::anyhow!("connection refused");
        assert!(!is_missing_table(&err));
        let err = anyhow::Error::new(Error::InsufficientContext);
        assert!(!is_missing_table(&err));
    }
}
