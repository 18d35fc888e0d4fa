//! Oracle HTTP API
//!
//! Thin REST layer over the engine: aggregate price, last-aggregation
//! details, feed listing and a health probe. Errors map onto a small stable
//! code set so dashboards can branch without parsing messages.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::OracleError;
use crate::oracle::PriceOracle;
use crate::types::{AggregateResult, PricePoint};

/// Create the API router with all endpoints
pub fn create_router(oracle: Arc<PriceOracle>) -> Router {
    Router::new()
        .route("/api/v1/prices/:feed_id", get(get_price))
        .route("/api/v1/prices/:feed_id/details", get(get_price_details))
        .route("/api/v1/feeds", get(list_feeds))
        .route("/api/v1/health", get(get_health))
        .with_state(oracle)
        // CORS for dashboards
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

struct ApiError(OracleError);

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OracleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OracleError::PairNotConfigured(_) | OracleError::NoDetails(_) => StatusCode::NOT_FOUND,
            OracleError::InsufficientSources { .. } => StatusCode::BAD_GATEWAY,
            OracleError::Config(_) | OracleError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// GET /api/v1/prices/:feed_id - aggregate price for a feed
async fn get_price(
    Path(feed_id): Path<String>,
    State(oracle): State<Arc<PriceOracle>>,
) -> Result<Json<AggregateResult>, ApiError> {
    let result = oracle.aggregate_feed(&feed_id).await?;
    Ok(Json(result))
}

/// GET /api/v1/prices/:feed_id/details - per-observation statuses from the
/// last aggregation attempt
async fn get_price_details(
    Path(feed_id): Path<String>,
    State(oracle): State<Arc<PriceOracle>>,
) -> Result<Json<Vec<PricePoint>>, ApiError> {
    let details = oracle.last_aggregation_details(&feed_id).await?;
    Ok(Json(details))
}

/// GET /api/v1/feeds - configured feed IDs
async fn list_feeds(State(oracle): State<Arc<PriceOracle>>) -> impl IntoResponse {
    Json(json!({ "feeds": oracle.feed_ids() }))
}

/// GET /api/v1/health
async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}
