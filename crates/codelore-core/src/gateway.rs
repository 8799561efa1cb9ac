//! Model gateway abstraction.
//!
//! The embedding and completion model is an external collaborator. Every
//! component that needs a vector or a generated text goes through
//! [`ModelGateway`]; concrete HTTP implementations live in the application
//! crate, tests supply deterministic fakes.
//!
//! Errors are propagated to the caller untouched. Nothing here retries.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::ChatMessage;

/// Stream of text deltas produced by a streamed completion.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Model identifier used for embeddings (for logs and stats).
    fn embedding_model(&self) -> &str;

    /// Dimensionality of every vector this gateway returns.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate a complete reply for `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a reply as a stream of text deltas.
    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn truncate_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("héllo", 0), "");
    }
}
