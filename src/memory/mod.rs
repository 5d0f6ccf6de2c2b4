//! Memory Governor
//!
//! Samples process memory around every browser task and on a timer, and
//! walks `Normal → Warning → Restarting → Terminated`. Entering
//! `Restarting` stops intake and wakes the restart supervisor; it is never
//! left again. A browser that keeps failing to start also forces a
//! restart.

pub mod allocator;
pub mod probe;

pub use allocator::TrackingAllocator;
pub use probe::{MemoryProbe, MemoryReading, ProcessProbe};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MemoryConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::utils::MEMORY_SAMPLE_CAPACITY;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    Normal,
    Warning,
    Restarting,
    Terminated,
}

impl MemoryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Restarting => "restarting",
            Self::Terminated => "terminated",
        }
    }
}

/// One memory measurement, kept in a bounded ring for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub at: DateTime<Utc>,
    pub rss_mb: f64,
    pub heap_used_mb: f64,
    pub heap_total_mb: f64,
    pub stage: String,
}

impl MemorySample {
    fn from_reading(reading: MemoryReading, stage: &str) -> Self {
        Self {
            at: Utc::now(),
            rss_mb: reading.rss_bytes as f64 / BYTES_PER_MB,
            heap_used_mb: reading.heap_used_bytes as f64 / BYTES_PER_MB,
            heap_total_mb: reading.heap_total_bytes as f64 / BYTES_PER_MB,
            stage: stage.to_string(),
        }
    }
}

struct GovernorInner {
    state: MemoryState,
    samples: VecDeque<MemorySample>,
}

pub struct MemoryGovernor {
    config: MemoryConfig,
    probe: Arc<dyn MemoryProbe>,
    inner: Mutex<GovernorInner>,
    accepting: AtomicBool,
    launch_failures: AtomicU32,
    restart_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for MemoryGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGovernor")
            .field("state", &self.state())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl MemoryGovernor {
    #[must_use]
    pub fn new(config: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let (restart_tx, _) = watch::channel(false);
        Self {
            config,
            probe,
            inner: Mutex::new(GovernorInner {
                state: MemoryState::Normal,
                samples: VecDeque::with_capacity(MEMORY_SAMPLE_CAPACITY),
            }),
            accepting: AtomicBool::new(true),
            launch_failures: AtomicU32::new(0),
            restart_tx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> MemoryState {
        self.inner.lock().state
    }

    /// Whether new requests are taken
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_restarting(&self) -> bool {
        self.state() >= MemoryState::Restarting
    }

    /// Fires `true` once the governor enters `Restarting`
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.restart_tx.subscribe()
    }

    /// Recent samples, oldest first
    #[must_use]
    pub fn samples(&self) -> Vec<MemorySample> {
        self.inner.lock().samples.iter().cloned().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<MemorySample> {
        self.inner.lock().samples.back().cloned()
    }

    /// Error returned to callers while intake is stopped
    #[must_use]
    pub fn exhaustion_error(&self) -> ScrapeError {
        ScrapeError::MemoryExhaustion {
            retry_after: self.config.retry_after,
        }
    }

    /// Reject new work once a restart is pending
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::MemoryExhaustion` when not accepting.
    pub fn ensure_accepting(&self) -> ScrapeResult<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(self.exhaustion_error())
        }
    }

    /// Take a sample, record it and apply any state transition
    pub fn sample(&self, stage: &str) -> MemorySample {
        let sample = MemorySample::from_reading(self.probe.read(), stage);
        let transition = {
            let mut inner = self.inner.lock();
            if inner.samples.len() == MEMORY_SAMPLE_CAPACITY {
                inner.samples.pop_front();
            }
            inner.samples.push_back(sample.clone());

            let next = self.next_state(inner.state, sample.rss_mb);
            let previous = inner.state;
            inner.state = next;
            (previous != next).then(|| (previous, next, inner.samples.clone()))
        };

        debug!(
            stage,
            rss_mb = sample.rss_mb,
            heap_used_mb = sample.heap_used_mb,
            "Memory sample"
        );

        if let Some((previous, next, history)) = transition {
            self.on_transition(previous, next, &sample, &history);
        }
        sample
    }

    fn next_state(&self, current: MemoryState, rss_mb: f64) -> MemoryState {
        if current >= MemoryState::Restarting {
            return current;
        }
        if rss_mb >= self.config.restart_mb as f64 {
            MemoryState::Restarting
        } else if rss_mb >= self.config.warning_mb as f64 {
            MemoryState::Warning
        } else {
            MemoryState::Normal
        }
    }

    fn on_transition(
        &self,
        previous: MemoryState,
        next: MemoryState,
        sample: &MemorySample,
        history: &VecDeque<MemorySample>,
    ) {
        match next {
            MemoryState::Warning => {
                warn!(
                    rss_mb = sample.rss_mb,
                    warning_mb = self.config.warning_mb,
                    stage = %sample.stage,
                    "Memory above warning threshold"
                );
                for s in history {
                    warn!(
                        at = %s.at.to_rfc3339(),
                        stage = %s.stage,
                        rss_mb = s.rss_mb,
                        heap_used_mb = s.heap_used_mb,
                        "Recent memory sample"
                    );
                }
            }
            MemoryState::Restarting => {
                error!(
                    rss_mb = sample.rss_mb,
                    restart_mb = self.config.restart_mb,
                    stage = %sample.stage,
                    "Memory above restart threshold, no longer accepting requests"
                );
                self.stop_intake();
            }
            MemoryState::Normal => {
                info!(from = previous.as_str(), "Memory back to normal");
            }
            MemoryState::Terminated => {}
        }
    }

    fn stop_intake(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.restart_tx.send_replace(true);
    }

    /// Count a browser that failed to start
    ///
    /// After `max_launch_failures` in a row the governor enters
    /// `Restarting` exactly as it does over the memory threshold.
    /// Returns the current run of failures.
    pub fn record_launch_failure(&self) -> u32 {
        let failures = self.launch_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.config.max_launch_failures;
        if limit == 0 || failures < limit {
            warn!(failures, limit, "Browser failed to start");
            return failures;
        }

        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            if previous < MemoryState::Restarting {
                inner.state = MemoryState::Restarting;
            }
            previous
        };
        if previous < MemoryState::Restarting {
            error!(
                failures,
                limit, "Browser keeps failing to start, no longer accepting requests"
            );
            self.stop_intake();
        }
        failures
    }

    /// A browser started; the failure run is over
    pub fn record_launch_success(&self) {
        self.launch_failures.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn launch_failures(&self) -> u32 {
        self.launch_failures.load(Ordering::SeqCst)
    }

    /// Pre-task check: sample, and refuse the task if over the hard limit
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::MemoryExhaustion` when the task must be skipped.
    pub fn check_before_task(&self, stage: &str) -> ScrapeResult<MemorySample> {
        self.ensure_accepting()?;
        let sample = self.sample(stage);
        if self.is_restarting() {
            warn!(stage, "Skipping task under memory pressure");
            return Err(self.exhaustion_error());
        }
        Ok(sample)
    }

    /// Post-task check: let freed memory settle, then sample
    pub async fn check_after_task(&self, stage: &str) -> MemorySample {
        reclaim().await;
        self.sample(stage)
    }

    /// Final state, set by the restart supervisor just before shutdown
    pub fn mark_terminated(&self) {
        let mut inner = self.inner.lock();
        inner.state = MemoryState::Terminated;
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Sample every `sample_interval` until the governor terminates
    pub fn spawn_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(governor.config.sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if governor.state() == MemoryState::Terminated {
                    break;
                }
                governor.sample("periodic");
            }
        })
    }
}

/// Give dropped browser buffers and closed sockets a moment to be released
///
/// There is no collector to force; yielding lets pending drops and task
/// teardown run before the next reading.
async fn reclaim() {
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
}
