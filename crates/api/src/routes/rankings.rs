//! Ranking endpoints.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;
use tracing::instrument;

use cart_insights_core::{TopSeller, TopSpender};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Rows returned when `limit` is absent.
pub const DEFAULT_LIMIT: u32 = 10;
/// Largest accepted `limit`.
pub const MAX_LIMIT: u32 = 100;

/// Query string accepted by both ranking endpoints.
///
/// `limit` is kept as text so a malformed value maps to our own 400 body
/// instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RankingQuery {
    limit: Option<String>,
}

/// `GET /top-spenders`
#[instrument(skip_all, fields(limit = tracing::field::Empty))]
pub async fn top_spenders(
    State(state): State<AppState>,
    query: std::result::Result<Query<RankingQuery>, QueryRejection>,
) -> Result<Json<Vec<TopSpender>>> {
    let limit = limit_from(query)?;
    tracing::Span::current().record("limit", limit);
    Ok(Json(state.aggregator().top_spenders(limit).await?))
}

/// `GET /top-sellers`
#[instrument(skip_all, fields(limit = tracing::field::Empty))]
pub async fn top_sellers(
    State(state): State<AppState>,
    query: std::result::Result<Query<RankingQuery>, QueryRejection>,
) -> Result<Json<Vec<TopSeller>>> {
    let limit = limit_from(query)?;
    tracing::Span::current().record("limit", limit);
    Ok(Json(state.aggregator().top_sellers(limit).await?))
}

fn limit_from(query: std::result::Result<Query<RankingQuery>, QueryRejection>) -> Result<u32> {
    let Query(query) = query.map_err(|rejection| AppError::InvalidParameter {
        parameter: "limit",
        message: rejection.body_text(),
    })?;
    parse_limit(query.limit.as_deref())
}

/// Parse `limit`, defaulting to [`DEFAULT_LIMIT`].
///
/// # Errors
///
/// Returns `AppError::InvalidParameter` unless the value is an integer in
/// `1..=MAX_LIMIT`.
pub fn parse_limit(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };

    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| (1..=MAX_LIMIT).contains(n))
        .ok_or_else(|| AppError::InvalidParameter {
            parameter: "limit",
            message: format!("must be an integer between 1 and {MAX_LIMIT}, got {raw:?}"),
        })
}
