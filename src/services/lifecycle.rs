use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use crate::errors::BookingError;
use crate::models::{Booking, BookingStatus, StatusChange, TransitionRequest, Window};
use crate::repo::BookingRepo;
use crate::services::pricing::compute_price;
use crate::services::reservation::ReservationGuard;

/// Statuses reachable from `from` in one step.
pub fn allowed_targets(from: BookingStatus) -> &'static [BookingStatus] {
    use BookingStatus::*;
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[InProgress, Cancelled, Rescheduled],
        InProgress => &[Completed, Cancelled],
        Rescheduled => &[Confirmed, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), BookingError> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}

/// Drives bookings through their status machine. Every accepted transition
/// is applied atomically; confirmations go through the reservation guard.
pub struct BookingLifecycle {
    bookings: Arc<dyn BookingRepo>,
    guard: Arc<ReservationGuard>,
}

impl BookingLifecycle {
    pub fn new(bookings: Arc<dyn BookingRepo>, guard: Arc<ReservationGuard>) -> Self {
        Self { bookings, guard }
    }

    pub fn transition(
        &self,
        booking_id: &str,
        req: &TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let to = BookingStatus::parse(req.to_status.trim()).ok_or_else(|| {
            BookingError::validation(format!("unknown status: {}", req.to_status))
        })?;

        let booking = self
            .bookings
            .get(booking_id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))?;
        let from = booking.status;
        check_transition(from, to)?;

        let new_window = requested_window(req, to)?;

        if to == BookingStatus::Confirmed {
            let confirmed = self.guard.reserve(
                &booking.provider_id,
                &booking.window(),
                &booking.id,
                req.notes.as_deref(),
            )?;
            tracing::info!(booking_id, %from, %to, "booking transitioned");
            return Ok(confirmed);
        }

        let cancellation_reason = if to == BookingStatus::Cancelled {
            let reason = req
                .cancellation_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| BookingError::validation("cancellation_reason is required"))?;
            Some(reason.to_string())
        } else {
            None
        };

        // A moved window is billed for its own duration on the captured basis
        let estimated_price = match &new_window {
            Some(window) => Some(
                compute_price(&booking.pricing, window.duration(), booking.quantity)?
                    .selling_price,
            ),
            None => None,
        };

        let change = StatusChange {
            from,
            to,
            at: now.trunc_subsecs(0),
            notes: req.notes.clone(),
            cancellation_reason,
            window: new_window,
            estimated_price,
            final_price: (to == BookingStatus::Completed).then_some(booking.estimated_price),
        };

        if !self.bookings.apply_change(booking_id, &change)? {
            // Someone moved the booking first; report against what it is now
            let current = self
                .bookings
                .get(booking_id)?
                .map(|b| b.status)
                .unwrap_or(from);
            return Err(BookingError::InvalidTransition { from: current, to });
        }

        tracing::info!(booking_id, %from, %to, "booking transitioned");

        self.bookings
            .get(booking_id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))
    }
}

/// A new window may only accompany a move to `rescheduled`, and needs both ends.
fn requested_window(
    req: &TransitionRequest,
    to: BookingStatus,
) -> Result<Option<Window>, BookingError> {
    match (req.start_datetime, req.end_datetime) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) if to == BookingStatus::Rescheduled => {
            Window::new(start.trunc_subsecs(0), end.trunc_subsecs(0))
                .map(Some)
                .ok_or_else(|| {
                    BookingError::validation("start_datetime must be before end_datetime")
                })
        }
        (Some(_), Some(_)) => Err(BookingError::validation(
            "a new window can only be given when rescheduling",
        )),
        _ => Err(BookingError::validation(
            "start_datetime and end_datetime must be given together",
        )),
    }
}
