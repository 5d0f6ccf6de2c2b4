//! UTF-8-safe string helpers
//!
//! Extracted text is frequently Japanese or Chinese; byte slicing would
//! panic on multi-byte boundaries, so everything here works in characters.

/// Safely truncate a string to a maximum number of characters (not bytes).
///
/// # Examples
/// ```
/// # use partwatch_extractor::utils::string_utils::safe_truncate_chars;
/// assert_eq!(safe_truncate_chars("Hello, World!", 5), "Hello");
/// assert_eq!(safe_truncate_chars("生産終了品のお知らせ", 4), "生産終了");
/// assert_eq!(safe_truncate_chars("Hi", 100), "Hi");
/// ```
#[inline]
pub fn safe_truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        None => s,
        Some((byte_idx, _)) => &s[..byte_idx],
    }
}

/// Number of Unicode scalar values in `s`
///
/// Content thresholds are expressed in characters so a CJK page is not
/// penalised for being byte-dense.
#[inline]
#[must_use]
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Format a byte count as MiB with one decimal, e.g. `23.1`
#[must_use]
pub fn format_mib(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / (1024.0 * 1024.0))
}
