//! Character-set detection and decoding
//!
//! Cascade: HTTP `charset` → `<meta charset>` / `http-equiv` → statistical
//! detection (only above the confidence threshold) → UTF-8.

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::sync::LazyLock;

/// How far into the document to look for a `<meta>` charset
const META_SCAN_BYTES: usize = 4096;

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_\-:.]+)"#)
        .expect("META_CHARSET_RE: hardcoded regex is valid")
});

/// Where the chosen encoding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Header,
    Meta,
    Detected,
    Fallback,
}

/// Decoded document text plus provenance
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub source: EncodingSource,
}

/// Map vendor and legacy aliases onto labels `encoding_rs` understands
#[must_use]
pub fn normalize_charset(label: &str) -> String {
    let lower = label
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_ascii_lowercase();
    match lower.as_str() {
        "sjis" | "shift-jis" | "x-sjis" | "ms_kanji" | "cp932" | "windows-31j" | "ms932" => {
            "shift_jis".to_string()
        }
        "euc_jp" | "eucjp" | "x-euc-jp" => "euc-jp".to_string(),
        "euc_kr" | "euckr" | "ks_c_5601-1987" | "cp949" => "euc-kr".to_string(),
        "gb2312" | "gb_2312-80" | "cp936" => "gbk".to_string(),
        "big5-hkscs" | "cp950" => "big5".to_string(),
        "utf8" | "utf_8" => "utf-8".to_string(),
        "latin1" | "latin-1" => "windows-1252".to_string(),
        _ => lower,
    }
}

fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(normalize_charset(label).as_bytes())
}

/// Extract `charset=` from a `Content-Type` header value
#[must_use]
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches('"').trim_matches('\'');
        (!label.is_empty()).then(|| label.to_owned())
    })
}

/// Find a charset declared in the document head
#[must_use]
pub fn charset_from_meta(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(META_SCAN_BYTES)];
    META_CHARSET_RE
        .captures(head)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Statistical detection; `None` when below `min_confidence`
#[must_use]
pub fn detect_statistically(body: &[u8], min_confidence: f32) -> Option<&'static Encoding> {
    let (charset, confidence, _language) = chardet::detect(body);
    if confidence < min_confidence || charset.is_empty() {
        tracing::trace!(%charset, confidence, "Charset detection below threshold");
        return None;
    }
    lookup(chardet::charset2encoding(&charset))
}

/// Decode a response body through the full cascade
#[must_use]
pub fn decode_body(body: &[u8], content_type: Option<&str>, min_confidence: f32) -> DecodedText {
    let (encoding, source) = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| lookup(&label))
        .map(|e| (e, EncodingSource::Header))
        .or_else(|| {
            charset_from_meta(body)
                .and_then(|label| lookup(&label))
                .map(|e| (e, EncodingSource::Meta))
        })
        .or_else(|| {
            detect_statistically(body, min_confidence).map(|e| (e, EncodingSource::Detected))
        })
        .unwrap_or((UTF_8, EncodingSource::Fallback));

    let (text, actual, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!(
            encoding = actual.name(),
            ?source,
            "Body contained invalid sequences for the selected encoding"
        );
    }

    DecodedText {
        text: text.into_owned(),
        encoding: actual.name(),
        source,
    }
}
