use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::check_auth;
use crate::errors::{AppError, BookingError};
use crate::models::{Booking, BookingOwner, BookingRequest, BookingStatus, TransitionRequest};
use crate::services::booking::{CreatedBooking, Quote};
use crate::state::AppState;

const MAX_PAGE_SIZE: i64 = 500;

// POST /bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Json(req) = payload?;

    let created = state.engine.create_booking(&req)?;
    Ok((StatusCode::CREATED, Json(created)))
}

// POST /quotes
#[derive(Deserialize)]
pub struct QuoteRequest {
    pub provider_id: String,
    pub service_id: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub quantity: Option<Decimal>,
}

pub async fn quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<QuoteRequest>, JsonRejection>,
) -> Result<Json<Quote>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Json(req) = payload?;

    let quote = state.engine.quote(&BookingRequest {
        customer_id: String::new(),
        provider_id: req.provider_id,
        service_id: req.service_id,
        start_datetime: req.start_datetime,
        end_datetime: req.end_datetime,
        quantity: req.quantity,
        notes: None,
    })?;
    Ok(Json(quote))
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    Ok(Json(state.engine.booking(&id)?))
}

// POST /bookings/:id/transition
pub async fn transition_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Json(req) = payload?;

    Ok(Json(state.engine.transition(&id, &req)?))
}

// GET /providers/:id/bookings and /customers/:id/bookings
#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn provider_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Query(query) = query?;
    list(&state, BookingOwner::Provider(&id), &query)
}

pub async fn customer_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    check_auth(&headers, &state.config.api_token)?;
    let Query(query) = query?;
    list(&state, BookingOwner::Customer(&id), &query)
}

fn list(
    state: &AppState,
    owner: BookingOwner<'_>,
    query: &ListQuery,
) -> Result<Json<Vec<Booking>>, AppError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            BookingStatus::parse(raw)
                .ok_or_else(|| BookingError::validation(format!("unknown status: {raw}")))?,
        ),
    };
    let limit = query
        .limit
        .unwrap_or(state.config.default_page_size)
        .clamp(1, MAX_PAGE_SIZE);

    Ok(Json(state.engine.list(owner, status, limit)?))
}
