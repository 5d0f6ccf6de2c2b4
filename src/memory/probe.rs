//! Memory probes
//!
//! The governor reads memory through [`MemoryProbe`] so tests can script
//! readings. [`ProcessProbe`] sums the resident set of this process and
//! every descendant, which is where Chrome's renderers live.

use super::allocator;

#[cfg(target_os = "linux")]
const PAGE_SIZE: u64 = 4096;

/// One raw reading in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
}

impl MemoryReading {
    #[must_use]
    pub fn from_mb(rss_mb: u64) -> Self {
        Self {
            rss_bytes: rss_mb * 1024 * 1024,
            ..Self::default()
        }
    }
}

pub trait MemoryProbe: Send + Sync {
    fn read(&self) -> MemoryReading;
}

/// Reads `/proc` for the process tree and the tracking allocator for heap
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessProbe;

impl MemoryProbe for ProcessProbe {
    fn read(&self) -> MemoryReading {
        let heap_used = allocator::heap_allocated() as u64;
        let heap_total = allocator::heap_peak() as u64;
        let rss = process_tree_rss().unwrap_or(heap_used);
        MemoryReading {
            rss_bytes: rss,
            heap_used_bytes: heap_used,
            heap_total_bytes: heap_total.max(heap_used),
        }
    }
}

/// RSS of this process plus all descendants, in bytes
#[cfg(target_os = "linux")]
fn process_tree_rss() -> Option<u64> {
    use std::collections::HashMap;

    let own = std::process::id();
    let own_rss = statm_rss(&own.to_string())?;

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    if let Ok(entries) = std::fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Some(ppid) = parent_pid(pid) {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }

    let mut total = own_rss;
    let mut stack = children.get(&own).cloned().unwrap_or_default();
    while let Some(pid) = stack.pop() {
        // processes can exit between the scan and the read
        total += statm_rss(&pid.to_string()).unwrap_or(0);
        if let Some(grandchildren) = children.get(&pid) {
            stack.extend(grandchildren);
        }
    }
    Some(total)
}

#[cfg(not(target_os = "linux"))]
fn process_tree_rss() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn statm_rss(pid: &str) -> Option<u64> {
    let content = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let pages = content.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(pages * PAGE_SIZE)
}

#[cfg(target_os = "linux")]
fn parent_pid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_ppid(&stat)
}

/// Parent pid from a `/proc/<pid>/stat` line
///
/// The command name is parenthesised and may contain spaces, so fields
/// are counted from the last `)`.
fn parse_ppid(stat: &str) -> Option<u32> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ppid_with_spaces_in_name() {
        let stat = "4242 (chrome (renderer)) S 4200 4242 4242 0 -1 4194560";
        assert_eq!(parse_ppid(stat), Some(4200));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_probe_reads_own_rss() {
        let reading = ProcessProbe.read();
        assert!(reading.rss_bytes > 0);
    }
}
