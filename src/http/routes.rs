//! Route table

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};

use super::auth::{AuthState, auth_middleware};
use super::handlers::{self, AppState};
use crate::service::SiteScrapeRequest;

/// Build the router; one `/scrape-<name>` route per registered site
pub fn create_router(app_state: AppState, auth_state: AuthState) -> Router {
    let mut scraping = Router::new()
        .route("/scrape", post(handlers::scrape))
        .route("/scrape-batch", post(handlers::scrape_batch));

    let sites: Vec<String> = app_state
        .service
        .registry()
        .names()
        .map(str::to_string)
        .collect();
    for site in sites {
        let path = format!("/scrape-{site}");
        scraping = scraping.route(
            &path,
            post(
                move |State(state): State<AppState>,
                      body: Result<Json<SiteScrapeRequest>, JsonRejection>| {
                    let site = site.clone();
                    async move { handlers::scrape_site(state, site, body).await }
                },
            ),
        );
    }

    let scraping = scraping.route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .merge(scraping)
        .with_state(app_state)
}
