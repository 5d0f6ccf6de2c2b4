pub mod browser_profile;
pub mod browser_setup;
pub mod callback;
pub mod config;
pub mod error;
pub mod fast_fetch;
pub mod http;
pub mod memory;
pub mod proxy;
pub mod render_engine;
pub mod scheduler;
pub mod service;
pub mod site_strategy;
pub mod url_guard;
pub mod utils;

pub use browser_setup::{
    apply_stealth_measures, download_managed_browser, find_browser_executable, launch_browser,
};
pub use callback::{CallbackDispatcher, CallbackPayload, DeliveryReport};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{ScrapeError, ScrapeResult};
pub use fast_fetch::{FastFetcher, FetchOutcome, FetchedContent};
pub use memory::{MemoryGovernor, MemoryProbe, MemoryReading, MemorySample, MemoryState};
pub use render_engine::{
    BrowserSession, ChromiumLauncher, NavigationOutcome, PageText, RenderEngine, RenderFailure,
    RenderOutput, SessionLauncher, SessionOptions,
};
pub use scheduler::{BrowserQueue, QueueSnapshot, QueuedTask};
pub use service::{
    AcceptedResponse, ExtractionMethod, ExtractionResult, ExtractionService, ScrapeRequest,
    ShutdownReason, SiteScrapeRequest,
};
pub use site_strategy::{Attempt, SiteRegistry, SiteRequest, SiteStrategy};
pub use url_guard::{UrlGuard, ValidationOutcome};
