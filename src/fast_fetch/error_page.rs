//! Error-page classification
//!
//! Many sites answer missing products with a 200 and a friendly "not found"
//! page, or with a bot wall. Such pages must not be forwarded as content.

use regex::Regex;
use std::sync::LazyLock;

use crate::utils::string_utils::char_len;

/// Body phrases are only trusted on short pages; long pages mention
/// "not found" in search widgets and footers.
const BODY_PHRASE_MAX_CHARS: usize = 3000;

const ERROR_PHRASES: &[&str] = &[
    // en
    "page not found",
    "404 not found",
    "error 404",
    "404 error",
    "the page you requested could not be found",
    "access denied",
    "403 forbidden",
    "you don't have permission to access",
    // de
    "seite nicht gefunden",
    "zugriff verweigert",
    // fr
    "page introuvable",
    "page non trouvée",
    "accès refusé",
    // es
    "página no encontrada",
    "acceso denegado",
    // it
    "pagina non trovata",
    "accesso negato",
    // ja
    "ページが見つかりません",
    "お探しのページは見つかりませんでした",
    "アクセスが拒否されました",
    // zh
    "页面不存在",
    "找不到页面",
    "访问被拒绝",
    "頁面不存在",
    // ko
    "페이지를 찾을 수 없습니다",
    "접근이 거부되었습니다",
];

static TITLE_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:404|403|not found|forbidden)\b")
        .expect("TITLE_STATUS_RE: hardcoded regex is valid")
});

/// Why a page was classified as an error page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPageReason {
    TooShort { chars: usize, min: usize },
    TitleMatch(String),
    BodyMatch(String),
}

impl std::fmt::Display for ErrorPageReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { chars, min } => {
                write!(f, "only {chars} characters, expected at least {min}")
            }
            Self::TitleMatch(phrase) => write!(f, "title contains \"{phrase}\""),
            Self::BodyMatch(phrase) => write!(f, "page says \"{phrase}\""),
        }
    }
}

/// Classify by phrase only; length is checked separately by callers that
/// have their own threshold
#[must_use]
pub fn match_error_phrase(title: Option<&str>, text: &str) -> Option<ErrorPageReason> {
    if let Some(title) = title {
        let lower = title.to_lowercase();
        if let Some(phrase) = ERROR_PHRASES.iter().find(|p| lower.contains(*p)) {
            return Some(ErrorPageReason::TitleMatch((*phrase).to_string()));
        }
        if let Some(m) = TITLE_STATUS_RE.find(&lower) {
            return Some(ErrorPageReason::TitleMatch(m.as_str().to_string()));
        }
    }

    if char_len(text) < BODY_PHRASE_MAX_CHARS {
        let lower = text.to_lowercase();
        if let Some(phrase) = ERROR_PHRASES.iter().find(|p| lower.contains(*p)) {
            return Some(ErrorPageReason::BodyMatch((*phrase).to_string()));
        }
    }

    None
}

/// Full classification used by the fast path
#[must_use]
pub fn classify(title: Option<&str>, text: &str, min_chars: usize) -> Option<ErrorPageReason> {
    let chars = char_len(text);
    if chars < min_chars {
        return Some(ErrorPageReason::TooShort {
            chars,
            min: min_chars,
        });
    }
    match_error_phrase(title, text)
}
