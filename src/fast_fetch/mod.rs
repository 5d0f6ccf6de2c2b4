//! Lightweight fetcher
//!
//! Plain HTTP retrieval with format-aware text extraction. Returns content
//! when the page is usable without JavaScript, and a fallback signal when
//! the browser should try instead. PDFs never fall back: their failures are
//! reported as placeholder text.

pub mod encoding;
pub mod error_page;
pub mod html_text;
pub mod pdf;

use anyhow::{Context, Result};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use reqwest::{Client, Response, StatusCode, redirect};
use std::collections::HashSet;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::url_guard::{UrlGuard, is_blocked_ip};
use crate::utils::constants::CHROME_USER_AGENT;
use crate::utils::string_utils::{char_len, format_mib};
use crate::utils::url_utils::{UrlKind, classify_url, refine_with_content_type};

pub use error_page::ErrorPageReason;
pub use pdf::{PdfPipeline, PdfText, PdfTextExtractor};

const MAX_REDIRECTS: usize = 10;

/// Text produced by the fast path
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub text: String,
    pub title: Option<String>,
    pub kind: UrlKind,
    pub final_url: String,

    /// `true` when `text` explains a failure instead of carrying page text
    pub placeholder: bool,
}

/// Result of a fast-path attempt
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Usable content (or a terminal PDF placeholder)
    Content(FetchedContent),
    /// Nothing usable; the browser should try. Carries the reason for logs.
    Fallback(String),
}

impl FetchOutcome {
    #[must_use]
    pub fn into_content(self) -> Option<FetchedContent> {
        match self {
            Self::Content(content) => Some(content),
            Self::Fallback(_) => None,
        }
    }
}

/// DNS resolver that drops private addresses
///
/// Closes the gap between validating a hostname and connecting to it:
/// a name that resolves to a blocked address never reaches a socket.
struct GuardedResolver {
    allowed_hosts: HashSet<String>,
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_ascii_lowercase();
        let bypass = self.allowed_hosts.contains(&host);
        Box::pin(async move {
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            let safe: Vec<SocketAddr> = resolved
                .iter()
                .copied()
                .filter(|addr| bypass || !is_blocked_ip(addr.ip()))
                .collect();
            if safe.is_empty() {
                let msg = format!("host '{host}' resolves only to blocked addresses");
                return Err(msg.into());
            }
            let addrs: Addrs = Box::new(safe.into_iter());
            Ok::<Addrs, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

/// Render-free HTTP extractor
#[derive(Clone)]
pub struct FastFetcher {
    client: Client,
    guard: Arc<UrlGuard>,
    config: FetchConfig,
    pdf: Arc<PdfPipeline>,
}

impl std::fmt::Debug for FastFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FastFetcher {
    /// Build a fetcher whose redirects and DNS answers go through `guard`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &FetchConfig, guard: Arc<UrlGuard>) -> Result<Self> {
        let redirect_guard = guard.clone();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let verdict = redirect_guard.check_target_url(attempt.url());
            if verdict.valid {
                attempt.follow()
            } else {
                let reason = verdict.reason.unwrap_or_default();
                warn!(to = %attempt.url(), %reason, "Blocked redirect");
                attempt.error(format!("redirect blocked: {reason}"))
            }
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,ja;q=0.8"),
        );

        let mut builder = Client::builder()
            .user_agent(CHROME_USER_AGENT)
            .default_headers(headers)
            .redirect(policy)
            .connect_timeout(Duration::from_secs(5));
        if guard.resolve_dns() {
            builder = builder.dns_resolver(Arc::new(GuardedResolver {
                allowed_hosts: guard.allowed_hosts().clone(),
            }));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            guard,
            config: config.clone(),
            pdf: Arc::new(PdfPipeline::default()),
        })
    }

    /// Replace the PDF backend chain
    #[must_use]
    pub fn with_pdf_pipeline(mut self, pipeline: PdfPipeline) -> Self {
        self.pdf = Arc::new(pipeline);
        self
    }

    /// Try to extract `url` without a browser
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let verdict = self.guard.check_target(url);
        if !verdict.valid {
            return FetchOutcome::Fallback(format!(
                "target rejected: {}",
                verdict.reason.unwrap_or_default()
            ));
        }

        let kind = classify_url(url);
        let header_timeout = self.timeout_for(kind);

        let request = self.client.get(url).send();
        let response = match tokio::time::timeout(header_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return self.request_failed(url, kind, &e.to_string()),
            Err(_) => {
                return self.request_failed(
                    url,
                    kind,
                    &format!("timed out after {}s", header_timeout.as_secs()),
                );
            }
        };

        let final_url = response.url().to_string();
        let final_verdict = self.guard.check_target_url(response.url());
        if !final_verdict.valid {
            return FetchOutcome::Fallback(format!(
                "final URL rejected: {}",
                final_verdict.reason.unwrap_or_default()
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let kind = refine_with_content_type(kind, content_type.as_deref());
        let status = response.status();

        debug!(%url, status = status.as_u16(), ?kind, "Fast fetch response");

        match kind {
            UrlKind::Pdf => {
                FetchOutcome::Content(self.handle_pdf(response, status, final_url).await)
            }
            UrlKind::Text | UrlKind::Html if !status.is_success() => {
                FetchOutcome::Fallback(format!("HTTP {}", status.as_u16()))
            }
            UrlKind::Text => self.handle_text(response, content_type, final_url).await,
            UrlKind::Html => self.handle_html(response, content_type, final_url).await,
        }
    }

    fn timeout_for(&self, kind: UrlKind) -> Duration {
        match kind {
            UrlKind::Pdf => self.config.pdf_timeout,
            UrlKind::Text | UrlKind::Html => self.config.html_timeout,
        }
    }

    fn request_failed(&self, url: &str, kind: UrlKind, reason: &str) -> FetchOutcome {
        if kind == UrlKind::Pdf {
            warn!(%url, %reason, "PDF request failed");
            return FetchOutcome::Content(pdf_placeholder(
                url,
                format!("[could not fetch PDF: {reason}]"),
            ));
        }
        debug!(%url, %reason, "Fast fetch request failed");
        FetchOutcome::Fallback(reason.to_string())
    }

    async fn read_body(&self, response: Response, kind: UrlKind) -> Result<Vec<u8>> {
        let timeout = self.timeout_for(kind);
        tokio::time::timeout(timeout, response.bytes())
            .await
            .with_context(|| format!("body timed out after {}s", timeout.as_secs()))?
            .map(|b| b.to_vec())
            .context("Failed to read body")
    }

    async fn handle_text(
        &self,
        response: Response,
        content_type: Option<String>,
        final_url: String,
    ) -> FetchOutcome {
        let body = match self.read_body(response, UrlKind::Text).await {
            Ok(body) => body,
            Err(e) => return FetchOutcome::Fallback(format!("{e:#}")),
        };
        let decoded = encoding::decode_body(
            &body,
            content_type.as_deref(),
            self.config.encoding_confidence,
        );
        let text = html_text::collapse_whitespace(&decoded.text);
        if text.is_empty() {
            return FetchOutcome::Fallback("empty text body".into());
        }
        FetchOutcome::Content(FetchedContent {
            text,
            title: None,
            kind: UrlKind::Text,
            final_url,
            placeholder: false,
        })
    }

    async fn handle_html(
        &self,
        response: Response,
        content_type: Option<String>,
        final_url: String,
    ) -> FetchOutcome {
        let body = match self.read_body(response, UrlKind::Html).await {
            Ok(body) => body,
            Err(e) => return FetchOutcome::Fallback(format!("{e:#}")),
        };
        let decoded = encoding::decode_body(
            &body,
            content_type.as_deref(),
            self.config.encoding_confidence,
        );
        debug!(encoding = decoded.encoding, source = ?decoded.source, "Decoded HTML body");

        let title = html_text::extract_title(&decoded.text);
        let text = html_text::html_to_text(&decoded.text);

        let min_chars = self.config.min_html_chars;
        if let Some(reason) = error_page::classify(title.as_deref(), &text, min_chars) {
            debug!(url = %final_url, %reason, "Fast fetch got an error page");
            return FetchOutcome::Fallback(format!("error page: {reason}"));
        }

        info!(url = %final_url, chars = char_len(&text), "Fast fetch succeeded");
        FetchOutcome::Content(FetchedContent {
            text,
            title,
            kind: UrlKind::Html,
            final_url,
            placeholder: false,
        })
    }

    async fn handle_pdf(
        &self,
        mut response: Response,
        status: StatusCode,
        final_url: String,
    ) -> FetchedContent {
        if !status.is_success() {
            warn!(
                url = %final_url,
                status = status.as_u16(),
                "PDF request returned an error status"
            );
            return pdf_placeholder(
                &final_url,
                format!("[could not fetch PDF: HTTP {}]", status.as_u16()),
            );
        }

        let max = self.config.max_pdf_bytes;
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = declared
            && len > max
        {
            warn!(url = %final_url, bytes = len, "PDF exceeds size limit, not downloading");
            let text = format!("[PDF too large ({} MB)]", format_mib(len));
            return pdf_placeholder(&final_url, text);
        }

        let timeout = self.config.pdf_timeout;
        let download = async {
            let mut bytes: Vec<u8> = Vec::with_capacity(declared.unwrap_or(0).min(max) as usize);
            while let Some(chunk) = response.chunk().await? {
                bytes.extend_from_slice(&chunk);
                if bytes.len() as u64 > max {
                    return Ok::<_, reqwest::Error>(None);
                }
            }
            Ok(Some(bytes))
        };

        let bytes = match tokio::time::timeout(timeout, download).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                warn!(url = %final_url, "PDF exceeded size limit while streaming");
                return pdf_placeholder(
                    &final_url,
                    format!("[PDF too large (more than {} MB)]", format_mib(max)),
                );
            }
            Ok(Err(e)) => {
                return pdf_placeholder(&final_url, format!("[could not fetch PDF: {e}]"));
            }
            Err(_) => {
                return pdf_placeholder(
                    &final_url,
                    format!("[could not fetch PDF: timed out after {}s]", timeout.as_secs()),
                );
            }
        };

        let pipeline = self.pdf.clone();
        let extracted = tokio::task::spawn_blocking(move || pipeline.extract(&bytes))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "PDF extraction task failed");
                PdfText::NoText
            });

        let placeholder = !matches!(extracted, PdfText::Extracted { .. });
        let text = extracted.into_content();
        info!(url = %final_url, chars = char_len(&text), placeholder, "PDF processed");

        FetchedContent {
            text,
            title: None,
            kind: UrlKind::Pdf,
            final_url,
            placeholder,
        }
    }
}

fn pdf_placeholder(url: &str, text: String) -> FetchedContent {
    FetchedContent {
        text,
        title: None,
        kind: UrlKind::Pdf,
        final_url: url.to_string(),
        placeholder: true,
    }
}
