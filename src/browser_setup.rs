//! Chrome discovery, download and launch
//!
//! One browser process is launched per render attempt and torn down
//! afterwards; nothing is pooled, so the launch path has to be cheap to
//! reason about and always bounded by the startup timeout.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::render_engine::scripts::STEALTH_SCRIPT;
use crate::utils::constants::CHROME_USER_AGENT;

/// Everything needed to start one isolated browser process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Passed through as `--proxy-server`
    pub proxy_server: Option<String>,
    /// Upper bound for a single CDP command (navigation included)
    pub request_timeout: Duration,
}

/// Find Chrome/Chromium on this machine.
///
/// `configured` (from `CHROME_PATH`) wins when it exists.
pub async fn find_browser_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            info!(path = %path.display(), "Using configured browser executable");
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "Configured browser executable does not exist");
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    if let Some(found) = candidates.iter().map(PathBuf::from).find(|p| p.exists()) {
        info!(path = %found.display(), "Found browser");
        return Ok(found);
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!(%path, "Found browser on PATH");
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    warn!("No Chrome/Chromium executable found, a managed build will be downloaded");
    Err(anyhow::anyhow!("Chrome/Chromium executable not found"))
}

/// Download a managed Chromium into the user cache directory.
pub async fn download_managed_browser() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("partwatch-extractor")
        .join("chromium");

    tokio::fs::create_dir_all(&cache_dir)
        .await
        .context("Failed to create browser cache directory")?;

    info!(dir = %cache_dir.display(), "Downloading managed Chromium");
    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("Failed to build fetcher options")?,
    );
    let revision = fetcher.fetch().await.context("Failed to fetch browser")?;

    info!(path = %revision.executable_path.display(), "Downloaded Chromium");
    Ok(revision.executable_path)
}

/// Resolve an executable once: configured, discovered, or downloaded
pub async fn resolve_executable(configured: Option<&Path>) -> Result<PathBuf> {
    match find_browser_executable(configured).await {
        Ok(path) => Ok(path),
        Err(_) => download_managed_browser().await,
    }
}

/// Launch Chrome with low-memory, low-fingerprint flags.
///
/// The returned handler task drives the CDP connection and must be aborted
/// once the browser is closed.
pub async fn launch_browser(spec: &LaunchSpec) -> Result<(Browser, JoinHandle<()>)> {
    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(spec.request_timeout)
        .window_size(1366, 900)
        .user_data_dir(spec.user_data_dir.clone())
        .chrome_executable(spec.executable.clone());

    builder = if spec.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    builder = builder
        .arg(format!("--user-agent={CHROME_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg("--disable-software-rasterizer")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-component-update")
        .arg("--disable-features=TranslateUI,site-per-process")
        .arg("--disable-hang-monitor")
        .arg("--disable-notifications")
        .arg("--disable-popup-blocking")
        .arg("--disable-prompt-on-repost")
        .arg("--metrics-recording-only")
        .arg("--mute-audio")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--no-zygote")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--js-flags=--max-old-space-size=192");

    if let Some(proxy) = &spec.proxy_server {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    debug!(profile = %spec.user_data_dir.display(), proxy = ?spec.proxy_server, "Launching browser");
    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let msg = e.to_string();
                // chromiumoxide cannot decode some newer CDP events; harmless
                let benign = msg.contains("data did not match any variant of untagged enum Message")
                    || msg.contains("Failed to deserialize WS response");
                if benign {
                    trace!("Suppressed benign CDP error: {msg}");
                } else {
                    error!("Browser handler error: {e:?}");
                }
            }
        }
        debug!("Browser handler task completed");
    });

    Ok((browser, handler_task))
}

/// Register navigator evasions for every document and pin a desktop viewport.
///
/// Must run before the first navigation.
pub async fn apply_stealth_measures(page: &Page) -> Result<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
        .context("Failed to register stealth script")?;

    page.execute(
        SetDeviceMetricsOverrideParams::builder()
            .width(1366)
            .height(900)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("Failed to set viewport")?;

    trace!("Stealth measures registered");
    Ok(())
}
