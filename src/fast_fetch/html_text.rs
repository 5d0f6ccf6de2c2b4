//! HTML to plain-text pipeline
//!
//! An ordered list of structural rewrites. Each stage is a plain function
//! so table handling and entity decoding can be tested on their own. The
//! browser path emits the same `[ROW] [CELL] a | [CELL] b` table form.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->").expect("COMMENT_RE: hardcoded regex is valid")
});

// The regex crate has no backreferences, so each element gets its own pattern.
static SCRIPT_LIKE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "noscript", "template", "svg"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("SCRIPT_LIKE_RES: hardcoded regex is valid")
        })
        .collect()
});

static CHROME_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["nav", "footer", "header"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("CHROME_RES: hardcoded regex is valid")
        })
        .collect()
});

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("ROW_RE: hardcoded regex is valid")
});

static CELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]\s*>").expect("CELL_RE: hardcoded regex is valid")
});

static TABLE_WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:table|thead|tbody|tfoot|caption|colgroup|col)\b[^>]*>")
        .expect("TABLE_WRAPPER_RE: hardcoded regex is valid")
});

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<(?:br|/?p|/?div|/?li|/?h[1-6]|/?section|/?article|/?ul|/?ol|/?dl|/?dd|/?dt|/?blockquote|/?pre|/?main|/?aside|/?form|hr)\b[^>]*>",
    )
    .expect("BLOCK_RE: hardcoded regex is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("TAG_RE: hardcoded regex is valid"));

static INLINE_WS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[ \t\r\f\x{00A0}\x{3000}]+").expect("INLINE_WS_RE: hardcoded regex is valid")
});

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("title").expect("TITLE_SELECTOR: hardcoded selector is valid")
});

/// One named rewrite in the pipeline
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Ordered HTML → text transformation
#[derive(Debug, Clone)]
pub struct TextPipeline {
    stages: Vec<Stage>,
}

impl Default for TextPipeline {
    fn default() -> Self {
        Self {
            stages: vec![
                Stage {
                    name: "comments",
                    apply: strip_comments,
                },
                Stage {
                    name: "scripts",
                    apply: strip_script_like,
                },
                Stage {
                    name: "page_chrome",
                    apply: strip_page_chrome,
                },
                Stage {
                    name: "tables",
                    apply: tables_to_rows,
                },
                Stage {
                    name: "block_breaks",
                    apply: block_breaks,
                },
                Stage {
                    name: "tags",
                    apply: strip_tags,
                },
                Stage {
                    name: "entities",
                    apply: decode_entities,
                },
                Stage {
                    name: "whitespace",
                    apply: collapse_whitespace,
                },
            ],
        }
    }
}

impl TextPipeline {
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    #[must_use]
    pub fn run(&self, html: &str) -> String {
        self.stages
            .iter()
            .fold(html.to_string(), |acc, stage| (stage.apply)(&acc))
    }
}

/// Convert an HTML document into readable plain text
#[must_use]
pub fn html_to_text(html: &str) -> String {
    TextPipeline::default().run(html)
}

/// Text of the first `<title>` element, whitespace-collapsed
#[must_use]
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document
        .select(&TITLE_SELECTOR)
        .next()?
        .text()
        .collect::<String>();
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

pub fn strip_comments(html: &str) -> String {
    COMMENT_RE.replace_all(html, "").into_owned()
}

pub fn strip_script_like(html: &str) -> String {
    SCRIPT_LIKE_RES
        .iter()
        .fold(html.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
}

pub fn strip_page_chrome(html: &str) -> String {
    CHROME_RES
        .iter()
        .fold(html.to_string(), |acc, re| re.replace_all(&acc, " ").into_owned())
}

/// Rewrite `<tr>` rows into `[ROW] [CELL] a | [CELL] b` lines
pub fn tables_to_rows(html: &str) -> String {
    let rows = ROW_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        let cells: Vec<String> = CELL_RE
            .captures_iter(&caps[1])
            .map(|cell| {
                let inner = TAG_RE.replace_all(&cell[1], " ");
                let inner = INLINE_WS_RE.replace_all(inner.trim(), " ");
                format!("[CELL] {}", inner.replace('\n', " ").trim())
            })
            .collect();
        if cells.is_empty() {
            "\n".to_string()
        } else {
            format!("\n[ROW] {}\n", cells.join(" | "))
        }
    });
    TABLE_WRAPPER_RE.replace_all(&rows, "\n").into_owned()
}

pub fn block_breaks(html: &str) -> String {
    BLOCK_RE.replace_all(html, "\n").into_owned()
}

pub fn strip_tags(html: &str) -> String {
    TAG_RE.replace_all(html, " ").into_owned()
}

pub fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Collapse runs of spaces and drop blank lines
pub fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| INLINE_WS_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
