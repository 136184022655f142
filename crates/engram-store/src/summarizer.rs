//! Summarizer abstraction
//!
//! The summarizer condenses a group of texts into one bounded text.
//! It is an external collaborator; failures degrade to a local
//! truncation fallback at the call site.

use async_trait::async_trait;
use engram_core::{Error, Result};

/// Trait for summarizers
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the texts into at most `max_len` characters
    async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String>;
}

/// Truncate a text to `max_len` characters, appending an ellipsis
/// when content was dropped
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Summarizer that joins inputs and truncates
///
/// The local fallback, also usable as a standalone summarizer for
/// embedded deployments.
pub struct TruncatingSummarizer;

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String> {
        let joined = texts.join(" ");
        Ok(truncate_with_ellipsis(&joined, max_len))
    }
}

/// A summarizer that always fails
///
/// Exercises the degradation path in tests.
pub struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _texts: &[String], _max_len: usize) -> Result<String> {
        Err(Error::Summarization("Summarizer unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
    }

    #[test]
    fn test_truncate_long_text() {
        let out = truncate_with_ellipsis("a very long piece of text", 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[tokio::test]
    async fn test_truncating_summarizer_joins() {
        let summarizer = TruncatingSummarizer;
        let texts = vec!["first".to_string(), "second".to_string()];

        let summary = summarizer.summarize(&texts, 100).await.unwrap();
        assert_eq!(summary, "first second");
    }

    #[tokio::test]
    async fn test_truncating_summarizer_bounds_output() {
        let summarizer = TruncatingSummarizer;
        let texts = vec!["word ".repeat(100)];

        let summary = summarizer.summarize(&texts, 20).await.unwrap();
        assert!(summary.chars().count() <= 20);
    }

    #[tokio::test]
    async fn test_failing_summarizer() {
        let summarizer = FailingSummarizer;
        let err = summarizer
            .summarize(&["x".to_string()], 10)
            .await
            .unwrap_err();
        assert!(err.is_degradable());
    }
}
