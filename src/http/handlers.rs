//! Request handlers

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::error::ScrapeError;
use crate::service::{
    BatchRequest, BatchResponse, ExtractionService, HealthReport, ScrapeRequest,
    SiteScrapeRequest, StatusReport,
};

#[derive(Clone, Debug)]
pub struct AppState {
    pub service: Arc<ExtractionService>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ScrapeError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ScrapeError::Validation(rejection.body_text()))
}

/// `POST /scrape`
pub async fn scrape(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Response, ScrapeError> {
    let request = json_body(body)?;
    let accepted = state.service.accept(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// `POST /scrape-<site>`
pub async fn scrape_site(
    state: AppState,
    site: String,
    body: Result<Json<SiteScrapeRequest>, JsonRejection>,
) -> Result<Response, ScrapeError> {
    let request = json_body(body)?;
    let accepted = state.service.accept_site(&site, request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// `POST /scrape-batch`
pub async fn scrape_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ScrapeError> {
    let request = json_body(body)?;
    let results = state.service.extract_batch(request.urls).await?;
    Ok(Json(BatchResponse {
        success: true,
        results,
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let report: HealthReport = state.service.health();
    let status = if report.accepting_requests {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.service.status())
}
