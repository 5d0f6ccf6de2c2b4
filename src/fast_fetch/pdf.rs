//! PDF text extraction
//!
//! `pdf-extract` is tried first; when it yields nothing (or panics, which it
//! does on some malformed files) `lopdf` gets a second pass, which copes
//! better with CID fonts used by Japanese and Chinese datasheets.

use anyhow::{Context, Result};

/// One PDF text backend
pub trait PdfTextExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// `pdf-extract` backend
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractBackend;

impl PdfTextExtractor for PdfExtractBackend {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let bytes = bytes.to_vec();
        // pdf-extract panics on some inputs; keep that inside this call
        std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem(&bytes))
            .map_err(|_| anyhow::anyhow!("pdf-extract panicked"))?
            .context("Failed to extract text from PDF")
    }
}

/// `lopdf` backend
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl PdfTextExtractor for LopdfBackend {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(bytes).context("Failed to parse PDF")?;
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        doc.extract_text(&pages)
            .context("Failed to extract text with lopdf")
    }
}

/// Outcome of running the extractor chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfText {
    Extracted { text: String, backend: &'static str },
    Encrypted,
    NoText,
}

impl PdfText {
    /// Text to forward: extracted text or an explanatory placeholder
    #[must_use]
    pub fn into_content(self) -> String {
        match self {
            Self::Extracted { text, .. } => text,
            Self::Encrypted => {
                "[PDF text could not be extracted: the document is encrypted]".to_string()
            }
            Self::NoText => "[PDF text could not be extracted: the document appears to be \
                             image-based (scanned) or encrypted]"
                .to_string(),
        }
    }
}

/// Ordered chain of PDF backends
pub struct PdfPipeline {
    extractors: Vec<Box<dyn PdfTextExtractor>>,
}

impl Default for PdfPipeline {
    fn default() -> Self {
        Self::new(vec![Box::new(PdfExtractBackend), Box::new(LopdfBackend)])
    }
}

impl std::fmt::Debug for PdfPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.extractors.iter().map(|e| e.name()).collect();
        f.debug_struct("PdfPipeline").field("extractors", &names).finish()
    }
}

impl PdfPipeline {
    #[must_use]
    pub fn new(extractors: Vec<Box<dyn PdfTextExtractor>>) -> Self {
        Self { extractors }
    }

    /// Run each backend until one yields non-empty text
    ///
    /// Blocking; call through `spawn_blocking`.
    #[must_use]
    pub fn extract(&self, bytes: &[u8]) -> PdfText {
        for extractor in &self.extractors {
            match extractor.extract(bytes) {
                Ok(raw) => {
                    let text = clean_text(&raw);
                    if !text.is_empty() {
                        tracing::debug!(
                            backend = extractor.name(),
                            chars = text.chars().count(),
                            "PDF text extracted"
                        );
                        return PdfText::Extracted {
                            text,
                            backend: extractor.name(),
                        };
                    }
                    tracing::debug!(backend = extractor.name(), "PDF backend returned no text");
                }
                Err(e) => {
                    tracing::debug!(
                        backend = extractor.name(),
                        error = %format!("{e:#}"),
                        "PDF backend failed"
                    );
                }
            }
        }

        if is_encrypted(bytes) {
            PdfText::Encrypted
        } else {
            PdfText::NoText
        }
    }
}

/// Whether the trailer declares an `/Encrypt` dictionary
#[must_use]
pub fn is_encrypted(bytes: &[u8]) -> bool {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc.trailer.get(b"Encrypt").is_ok(),
        Err(_) => contains(bytes, b"/Encrypt"),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Trim lines and keep single blank lines as paragraph breaks
#[must_use]
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .fold(Vec::<&str>::new(), |mut acc, line| {
            if !line.is_empty() || acc.last().is_some_and(|l| !l.is_empty()) {
                acc.push(line);
            }
            acc
        })
        .join("\n")
        .trim()
        .to_string()
}
