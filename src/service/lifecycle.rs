//! Restart supervisor and shutdown signals
//!
//! When the governor enters `Restarting`, the supervisor waits the grace
//! delay, optionally drains accepted jobs and the browser queue, marks the
//! governor `Terminated` and lets the HTTP server shut down. The binary
//! then exits with a distinct status so the process supervisor restarts it.

use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use super::ExtractionService;
use crate::config::RestartPolicy;

/// Why the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C or SIGTERM
    Signal,
    /// Memory governor requested a restart
    MemoryRestart,
}

/// Resolve once a memory-triggered restart is ready to proceed
pub async fn wait_for_restart(service: Arc<ExtractionService>) {
    let mut restart_rx = service.governor().subscribe();
    let requested = restart_rx.wait_for(|restarting| *restarting).await.is_ok();
    if !requested {
        // governor dropped: no restart will ever come
        std::future::pending::<()>().await;
    }

    let memory = service.governor().config();
    warn!(
        grace_ms = memory.exit_grace.as_millis() as u64,
        policy = ?memory.restart_policy,
        "Restart requested by memory governor"
    );
    tokio::time::sleep(memory.exit_grace).await;

    if memory.restart_policy == RestartPolicy::Drain {
        let snapshot = service.queue().snapshot();
        info!(
            jobs = service.jobs_in_flight(),
            queued = snapshot.queued,
            running = snapshot.running,
            "Draining jobs and browser queue before restart"
        );
        if !service.drain(memory.drain_timeout).await {
            warn!(
                timeout_secs = memory.drain_timeout.as_secs(),
                jobs = service.jobs_in_flight(),
                "Jobs did not drain in time, restarting anyway"
            );
        }
    }

    service.governor().mark_terminated();
    info!("Memory governor terminated, shutting down for restart");
}

/// Resolve on the first of Ctrl+C, SIGTERM or a memory restart
pub async fn wait_for_shutdown(service: Arc<ExtractionService>) -> ShutdownReason {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            ShutdownReason::Signal
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down");
            ShutdownReason::Signal
        }
        () = wait_for_restart(service) => ShutdownReason::MemoryRestart,
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
