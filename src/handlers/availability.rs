use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::check_auth;
use crate::errors::{AppError, BookingError};
use crate::services::availability::DayAvailability;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Days per page; the whole range when absent.
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub provider_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: Vec<DayAvailability>,
    /// First date of the next page, if the range continues past this one.
    pub next_from: Option<NaiveDate>,
}

// GET /providers/:id/availability?from=&to=&limit=
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider_id): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Query(AvailabilityQuery { from, to, limit }) = query?;

    let span = (to - from).num_days() + 1;
    if span > state.config.max_availability_days {
        return Err(BookingError::validation(format!(
            "availability range is limited to {} days",
            state.config.max_availability_days
        ))
        .into());
    }
    let page = match limit {
        Some(n) if n < 1 => {
            return Err(BookingError::validation("`limit` must be at least 1").into());
        }
        Some(n) => n.min(span),
        None => span,
    };

    let days: Vec<DayAvailability> = state
        .engine
        .free_windows(&provider_id, from, to)?
        .take(usize::try_from(page).unwrap_or(usize::MAX))
        .collect();

    let next_from = days
        .last()
        .and_then(|day| day.date.checked_add_days(Days::new(1)))
        .filter(|next| *next <= to);

    Ok(Json(AvailabilityResponse {
        provider_id,
        from,
        to,
        days,
        next_from,
    }))
}
