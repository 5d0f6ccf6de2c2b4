//! Shared configuration constants for the extraction service
//!
//! Default values used by the config builder and by placeholder/limit
//! logic, kept in one place to avoid magic numbers.

use std::time::Duration;

/// Chrome user agent string for both fetch paths
///
/// Kept identical between reqwest and the headless browser so a site sees
/// one client regardless of which path handled the page.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Timeout for plain HTML/text fetches
pub const DEFAULT_HTML_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for PDF downloads (larger bodies, slower servers)
pub const DEFAULT_PDF_TIMEOUT: Duration = Duration::from_secs(30);

/// PDFs above this size are rejected before download: 20 MiB
pub const MAX_PDF_BYTES: u64 = 20 * 1024 * 1024;

/// Fast-path HTML shorter than this is treated as an error page
pub const MIN_HTML_TEXT_CHARS: usize = 200;

/// Browser-extracted text shorter than this is replaced by a placeholder
pub const MIN_CONTENT_CHARS: usize = 100;

/// Minimum statistical confidence before trusting a detected charset
pub const ENCODING_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Navigation timeout for the browser path
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);

/// Extraction timeout, deliberately shorter than navigation
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Browser process startup timeout
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settle period after navigation for ordinary sites
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Settle period for sites known to serve a bot challenge first
pub const CHALLENGE_SETTLE_DELAY: Duration = Duration::from_secs(8);

/// Memory ring buffer length for diagnostics
pub const MEMORY_SAMPLE_CAPACITY: usize = 20;

/// Warning threshold (MiB) for a 512 MiB host
pub const DEFAULT_MEMORY_WARNING_MB: u64 = 400;

/// Restart threshold (MiB) for a 512 MiB host
pub const DEFAULT_MEMORY_RESTART_MB: u64 = 450;

/// Process exit status used for a memory-driven restart
///
/// `EX_TEMPFAIL` so supervisors can tell it apart from a crash.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Maximum callback attempts (first try included)
pub const DEFAULT_CALLBACK_ATTEMPTS: u32 = 3;

/// First retry delay; doubles per attempt
pub const DEFAULT_CALLBACK_BASE_DELAY: Duration = Duration::from_secs(1);

/// Extra delay added to each retry while the service is restarting
pub const RESTART_CALLBACK_EXTRA_DELAY: Duration = Duration::from_secs(2);

/// Consecutive browser launch failures that force a restart
pub const DEFAULT_MAX_LAUNCH_FAILURES: u32 = 3;

/// Upper bound on URLs accepted by the batch endpoint
pub const DEFAULT_MAX_BATCH_URLS: usize = 10;

/// Asset hosts blocked by default when tracking blocking is on
pub const DEFAULT_TRACKING_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.net",
    "hotjar.com",
    "clarity.ms",
    "linkedin.com/px",
    "adobedtm.com",
    "demdex.net",
    "omtrdc.net",
    "bing.com/bat",
    "cookielaw.org",
    "onetrust.com",
];
