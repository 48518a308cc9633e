use axum::{
    extract::State,
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use marketslice_core::config::Settings;
use marketslice_core::domain::request::{
    PortfolioCsvBody, PortfolioRequest, PortfolioRequestBody, ValidationError,
};
use marketslice_core::export::csv::export_table_csv;
use marketslice_core::ingest::SourceSet;
use marketslice_core::pipeline::{self, PipelineError, PortfolioOutcome};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sources: SourceSet,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Unauthorized,
    Upstream(PipelineError),
    Internal(anyhow::Error),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Upstream(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": err.to_string() })),
            )
                .into_response(),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "invalid or missing API key" })),
            )
                .into_response(),
            ApiError::Upstream(err) => {
                sentry::capture_error(&err);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "detail": err.to_string(),
                        "failures": err.failures(),
                    })),
                )
                    .into_response()
            }
            ApiError::Internal(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn portfolio_ohlcv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PortfolioRequestBody>,
) -> Result<Response, ApiError> {
    check_api_key(&state.settings, &headers)?;
    let req = body.validate(state.settings.max_tickers_ceiling)?;
    run(&state, req).await
}

pub async fn portfolio_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PortfolioCsvBody>,
) -> Result<Response, ApiError> {
    check_api_key(&state.settings, &headers)?;
    let req = body.validate(state.settings.max_tickers_ceiling)?;
    run(&state, req).await
}

fn check_api_key(settings: &Settings, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = settings.expected_api_key() else {
        return Ok(());
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if bool::from(provided.ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn run(state: &AppState, req: PortfolioRequest) -> Result<Response, ApiError> {
    tracing::info!(
        batch_id = %req.batch_id,
        tickers = req.tickers.len(),
        interval = %req.interval,
        source = ?req.source,
        "portfolio request accepted"
    );

    let strategy = state.sources.strategy_for(&req);
    let outcome = pipeline::run_portfolio(&strategy, &req).await?;
    csv_response(&req, &outcome)
}

fn csv_response(req: &PortfolioRequest, outcome: &PortfolioOutcome) -> Result<Response, ApiError> {
    let body = export_table_csv(&outcome.table).map_err(ApiError::Internal)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    headers.insert(
        CONTENT_DISPOSITION,
        header_value(&format!("attachment; filename=\"{}\"", attachment_name(req)))?,
    );
    headers.insert("x-batch-id", header_value(&req.batch_id)?);
    if let Some(portfolio_id) = &req.portfolio_id {
        headers.insert("x-portfolio-id", header_value(portfolio_id)?);
    }
    if !outcome.failures.is_empty() {
        headers.insert(
            "x-failed-tickers",
            header_value(&outcome.failed_tickers().join(","))?,
        );
    }
    if !outcome.sources.is_empty() {
        let sources: Vec<&str> = outcome.sources.iter().map(|s| s.as_str()).collect();
        headers.insert("x-data-sources", header_value(&sources.join(","))?);
    }

    Ok((StatusCode::OK, headers, body).into_response())
}

fn attachment_name(req: &PortfolioRequest) -> String {
    match &req.portfolio_id {
        Some(portfolio_id) => format!(
            "portfolio_{portfolio_id}_{}_{}.csv",
            req.batch_id, req.interval
        ),
        None => format!("portfolio_{}_{}.csv", req.batch_id, req.interval),
    }
}

fn header_value(s: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(s).map_err(|e| ApiError::Internal(anyhow::Error::new(e)))
}
