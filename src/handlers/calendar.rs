use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};

use super::check_auth;
use crate::errors::AppError;
use crate::services::calendar::generate_ics;
use crate::state::AppState;

// GET /bookings/:id/calendar.ics
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, AppError> {
    check_auth(&headers, &state.config.api_token)?;

    let booking = state.engine.booking(&booking_id)?;

    // Fall back to the id if the provider row has gone
    let provider_name = state
        .engine
        .provider(&booking.provider_id)
        .map(|p| p.name)
        .ok()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| booking.provider_id.clone());

    let ics = generate_ics(&booking, &provider_name);
    let filename = format!("booking-{}.ics", booking.id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response())
}
