//! Post-extraction content validation and placeholder text
//!
//! Near-empty or error-page renders are replaced with a sentence that says
//! what went wrong, so the consumer never has to guess from absent text.

use std::time::Duration;

use crate::fast_fetch::error_page::{ErrorPageReason, match_error_phrase};
use crate::utils::string_utils::char_len;

/// Result of content validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentValidationResult {
    pub is_valid: bool,
    /// Extracted text when valid, placeholder otherwise
    pub content: String,
    pub reason: Option<String>,
}

impl ContentValidationResult {
    #[must_use]
    pub fn valid(content: String) -> Self {
        Self {
            is_valid: true,
            content,
            reason: None,
        }
    }

    #[must_use]
    pub fn invalid(placeholder: String, reason: String) -> Self {
        Self {
            is_valid: false,
            content: placeholder,
            reason: Some(reason),
        }
    }
}

/// `[could not be scraped: <url> returned an error page (<reason>)]`
#[must_use]
pub fn error_page_placeholder(url: &str, reason: &str) -> String {
    format!("[could not be scraped: {url} returned an error page ({reason})]")
}

#[must_use]
pub fn insufficient_content_placeholder(url: &str, chars: usize) -> String {
    format!(
        "[insufficient content: only {chars} characters extracted from {url}; the page may be \
         protected by bot detection, require authentication, or be empty]"
    )
}

#[must_use]
pub fn launch_failure_placeholder(detail: &str) -> String {
    format!("[could not be scraped: browser failed to start ({detail})]")
}

#[must_use]
pub fn extraction_timeout_placeholder(after: Duration) -> String {
    format!(
        "[could not be scraped: content extraction timed out after {}s]",
        after.as_secs()
    )
}

#[must_use]
pub fn navigation_failure_placeholder(url: &str, detail: &str) -> String {
    format!("[could not be scraped: {url} failed to load ({detail})]")
}

#[must_use]
pub fn memory_pressure_placeholder() -> String {
    "[could not be scraped: service is restarting under memory pressure, retry later]".to_string()
}

/// Validate browser-extracted text
///
/// Error phrases are checked before length so a short "Page Not Found"
/// is reported as an error page, not as thin content.
#[must_use]
pub fn validate_page_content(
    url: &str,
    title: Option<&str>,
    text: &str,
    min_chars: usize,
) -> ContentValidationResult {
    if let Some(reason) = match_error_phrase(title, text) {
        let reason_text = match &reason {
            ErrorPageReason::TitleMatch(p) | ErrorPageReason::BodyMatch(p) => p.clone(),
            ErrorPageReason::TooShort { .. } => reason.to_string(),
        };
        tracing::info!(%url, %reason, "Rendered page is an error page");
        return ContentValidationResult::invalid(
            error_page_placeholder(url, &reason_text),
            reason.to_string(),
        );
    }

    let chars = char_len(text.trim());
    if chars < min_chars {
        tracing::info!(%url, chars, min_chars, "Rendered page has too little text");
        return ContentValidationResult::invalid(
            insufficient_content_placeholder(url, chars),
            format!("only {chars} characters"),
        );
    }

    ContentValidationResult::valid(text.to_string())
}
