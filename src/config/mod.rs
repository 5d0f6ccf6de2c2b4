//! Configuration module for the extraction service
//!
//! This module provides the `ServiceConfig` struct, its builder with
//! validation and sensible defaults, and the environment loader used by the
//! binary.

// Sub-modules
pub mod builder;
pub mod env;
pub mod types;

// Re-exports for public API
pub use builder::ServiceConfigBuilder;
pub use types::{
    BlockPolicy, BrowserConfig, CallbackConfig, FetchConfig, GuardConfig, MemoryConfig,
    ProxyConfig, RestartPolicy, ServerConfig, ServiceConfig,
};
