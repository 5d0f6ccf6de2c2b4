//! HTTP surface
//!
//! axum router over an [`ExtractionService`](crate::service::ExtractionService).
//! Scraping endpoints sit behind the shared-secret middleware; `/health`
//! and `/status` are open.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod server;

pub use auth::{API_KEY_HEADER, AuthState, auth_middleware};
pub use handlers::AppState;
pub use routes::create_router;
pub use server::serve;
