//! URL classification helpers
//!
//! Decides which extraction path a URL needs before any request is made,
//! and refines that decision once the response `Content-Type` is known.

use serde::{Deserialize, Serialize};
use url::Url;

/// Content class of a target URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Pdf,
    Text,
    Html,
}

const TEXT_EXTENSIONS: &[&str] = &[".txt", ".csv", ".md", ".json", ".xml"];

/// Classify a URL by extension and path/query hints
#[must_use]
pub fn classify_url(url: &str) -> UrlKind {
    let Ok(parsed) = Url::parse(url) else {
        return UrlKind::Html;
    };

    let path = parsed.path().to_ascii_lowercase();
    if path.ends_with(".pdf") || path.contains("/pdf/") {
        return UrlKind::Pdf;
    }

    let pdf_query_hint = parsed.query_pairs().any(|(k, v)| {
        let k = k.to_ascii_lowercase();
        let v = v.to_ascii_lowercase();
        (k == "format" || k == "type") && v == "pdf" || v.ends_with(".pdf")
    });
    if pdf_query_hint {
        return UrlKind::Pdf;
    }

    if TEXT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return UrlKind::Text;
    }

    UrlKind::Html
}

/// Refine a URL classification using the response content type
#[must_use]
pub fn refine_with_content_type(kind: UrlKind, content_type: Option<&str>) -> UrlKind {
    let Some(ct) = content_type else {
        return kind;
    };
    let ct = ct.to_ascii_lowercase();
    if ct.contains("application/pdf") {
        UrlKind::Pdf
    } else if ct.starts_with("text/plain") || ct.starts_with("text/csv") {
        UrlKind::Text
    } else if ct.contains("html") {
        UrlKind::Html
    } else {
        kind
    }
}
