// Content-extraction worker
//
// Serves the scraping API until a signal or a memory-triggered restart.
// A restart exits with RESTART_EXIT_CODE so the process supervisor brings
// the service back with a fresh heap and no stray Chrome processes.

use anyhow::Result;
use partwatch_extractor::browser_profile::cleanup_stale_profiles;
use partwatch_extractor::memory::TrackingAllocator;
use partwatch_extractor::utils::RESTART_EXIT_CODE;
use partwatch_extractor::{ExtractionService, ServiceConfig, ShutdownReason};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("partwatch_extractor=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is normal in production
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ServiceConfig::from_env()?;

    match cleanup_stale_profiles() {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Removed abandoned browser profiles"),
        Err(e) => warn!("Profile cleanup failed: {e:#}"),
    }

    let service = ExtractionService::from_config(config)?;
    let sampler = service.governor().spawn_sampler();

    let reason = partwatch_extractor::http::serve(service).await?;
    sampler.abort();

    if reason == ShutdownReason::MemoryRestart {
        warn!(code = RESTART_EXIT_CODE, "Exiting for memory restart");
        std::process::exit(RESTART_EXIT_CODE);
    }
    info!("Shut down cleanly");
    Ok(())
}
