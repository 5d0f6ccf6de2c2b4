//! Per-session Chrome profile directories
//!
//! Every launch gets a fresh UUID-named profile that is removed when the
//! session ends. Leftovers from a crash or a hard restart are swept at
//! startup.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix for every profile directory this service creates
pub const PROFILE_PREFIX: &str = "partwatch_chrome";

/// RAII wrapper for a Chrome profile directory
///
/// Removes the directory on drop unless `into_path()` was called.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl BrowserProfile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup_on_drop: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up ownership of the directory; it will no longer be removed.
    pub fn into_path(mut self) -> PathBuf {
        self.cleanup_on_drop = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            debug!(path = %self.path.display(), "Removing browser profile");
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove browser profile");
            }
        }
    }
}

/// Create a unique profile directory under `base`
///
/// # Example
/// ```
/// # fn main() -> anyhow::Result<()> {
/// use partwatch_extractor::browser_profile::create_unique_profile_in;
///
/// let base = std::env::temp_dir();
/// let profile = create_unique_profile_in(&base)?;
/// assert!(profile.path().exists());
/// # Ok(())
/// # }
/// ```
pub fn create_unique_profile_in(base: &Path) -> Result<BrowserProfile> {
    let path = base.join(format!("{PROFILE_PREFIX}_{}", Uuid::new_v4()));

    // create_dir (not _all) so a UUID collision is an error, not a shared profile
    std::fs::create_dir(&path)
        .with_context(|| format!("Failed to create profile directory: {}", path.display()))?;

    debug!(path = %path.display(), "Created browser profile");
    Ok(BrowserProfile::new(path))
}

/// Create a unique profile directory in the system temp dir
pub fn create_unique_profile() -> Result<BrowserProfile> {
    create_unique_profile_in(&std::env::temp_dir())
}

/// Whether the Chrome process that owns `profile_dir` is gone
///
/// `SingletonLock` is a symlink to `{hostname}-{pid}`.
#[must_use]
pub fn is_profile_abandoned(profile_dir: &Path) -> bool {
    let lock = profile_dir.join("SingletonLock");
    let Ok(target) = std::fs::read_link(&lock) else {
        // no lock at all: never started, or exited cleanly
        return true;
    };

    let pid = target
        .to_string_lossy()
        .rsplit('-')
        .next()
        .and_then(|p| p.parse::<u32>().ok());

    match pid {
        Some(pid) if cfg!(target_os = "linux") => !Path::new("/proc").join(pid.to_string()).exists(),
        Some(_) => false,
        None => true,
    }
}

/// Remove abandoned profile directories under `base`
///
/// Returns the number of directories removed.
pub fn cleanup_stale_profiles_in(base: &Path) -> Result<usize> {
    let entries = std::fs::read_dir(base)
        .with_context(|| format!("Failed to read directory: {}", base.display()))?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PROFILE_PREFIX));

        if is_ours && path.is_dir() && is_profile_abandoned(&path) {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale profile"),
            }
        }
    }

    if removed > 0 {
        info!(removed, "Removed stale browser profiles");
    }
    Ok(removed)
}

/// Sweep the system temp dir
pub fn cleanup_stale_profiles() -> Result<usize> {
    cleanup_stale_profiles_in(&std::env::temp_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let profile = create_unique_profile_in(base.path()).unwrap();
        let path = profile.path().to_path_buf();
        assert!(path.exists());
        drop(profile);
        assert!(!path.exists());
    }

    #[test]
    fn test_into_path_keeps_directory() {
        let base = tempfile::tempdir().unwrap();
        let path = create_unique_profile_in(base.path()).unwrap().into_path();
        assert!(path.exists());
    }

    #[test]
    fn test_stale_sweep_only_touches_our_prefix() {
        let base = tempfile::tempdir().unwrap();
        let ours = create_unique_profile_in(base.path()).unwrap().into_path();
        let other = base.path().join("someone_else");
        std::fs::create_dir(&other).unwrap();

        let removed = cleanup_stale_profiles_in(base.path()).unwrap();

        assert_eq!(removed, 1);
        assert!(!ours.exists());
        assert!(other.exists());
    }
}
