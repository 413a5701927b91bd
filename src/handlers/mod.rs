pub mod availability;
pub mod bookings;
pub mod calendar;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/quotes", post(bookings::quote))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/events", get(events::events_stream))
        .route("/bookings/:id", get(bookings::get_booking))
        .route(
            "/bookings/:id/transition",
            post(bookings::transition_booking),
        )
        .route(
            "/bookings/:id/calendar.ics",
            get(calendar::download_ics),
        )
        .route(
            "/providers/:id/availability",
            get(availability::get_availability),
        )
        .route(
            "/providers/:id/bookings",
            get(bookings::provider_bookings),
        )
        .route(
            "/customers/:id/bookings",
            get(bookings::customer_bookings),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bearer-token check. An empty configured token turns auth off.
pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    if expected_token.is_empty() {
        return Ok(());
    }
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
