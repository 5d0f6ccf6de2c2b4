pub mod constants;
pub mod string_utils;
pub mod url_utils;

pub use constants::*;
pub use string_utils::{char_len, format_mib, safe_truncate_chars};
pub use url_utils::{UrlKind, classify_url, refine_with_content_type};
