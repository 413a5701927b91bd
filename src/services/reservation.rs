use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::errors::{BookingError, ConflictReason};
use crate::models::{Booking, BookingStatus, ClaimOutcome, Window};
use crate::repo::BookingRepo;
use crate::services::availability::AvailabilityResolver;

#[derive(Debug, Clone)]
struct PendingClaim {
    booking_id: String,
    window: Window,
}

/// Serializes reservation decisions per provider.
///
/// Windows being reserved are tracked per provider. A request overlapping one
/// of them reports a conflict straight away instead of waiting; disjoint
/// windows of the same provider proceed side by side. The calendar is then
/// re-read and the overlap check plus status update run as one storage
/// transaction, which is itself backed by the bookings table's overlap trigger.
pub struct ReservationGuard {
    resolver: AvailabilityResolver,
    bookings: Arc<dyn BookingRepo>,
    in_flight: DashMap<String, Vec<PendingClaim>>,
}

/// Marks a window as being reserved until dropped.
struct InFlight<'a> {
    guard: &'a ReservationGuard,
    provider_id: String,
    booking_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut claims) = self.guard.in_flight.get_mut(&self.provider_id) {
            claims.retain(|c| c.booking_id != self.booking_id);
        }
        self.guard
            .in_flight
            .remove_if(&self.provider_id, |_, claims| claims.is_empty());
    }
}

impl ReservationGuard {
    pub fn new(resolver: AvailabilityResolver, bookings: Arc<dyn BookingRepo>) -> Self {
        Self {
            resolver,
            bookings,
            in_flight: DashMap::new(),
        }
    }

    /// Register `window` as in flight, or return the in-flight window it overlaps.
    fn begin(
        &self,
        provider_id: &str,
        booking_id: &str,
        window: &Window,
    ) -> Result<InFlight<'_>, Window> {
        let mut claims = self.in_flight.entry(provider_id.to_string()).or_default();
        if let Some(busy) = claims.iter().find(|c| c.window.overlaps(window)) {
            return Err(busy.window);
        }
        claims.push(PendingClaim {
            booking_id: booking_id.to_string(),
            window: *window,
        });

        Ok(InFlight {
            guard: self,
            provider_id: provider_id.to_string(),
            booking_id: booking_id.to_string(),
        })
    }

    /// Claim `window` for `booking_id`, moving the booking to `confirmed`.
    /// The booking must be pending or rescheduled and already carry `window`.
    pub fn try_reserve(
        &self,
        provider_id: &str,
        window: &Window,
        booking_id: &str,
    ) -> Result<Booking, BookingError> {
        self.reserve(provider_id, window, booking_id, None)
    }

    /// `try_reserve`, also storing `notes` on the confirmed booking.
    pub fn reserve(
        &self,
        provider_id: &str,
        window: &Window,
        booking_id: &str,
        notes: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let _claim = match self.begin(provider_id, booking_id, window) {
            Ok(claim) => claim,
            Err(busy) => {
                tracing::info!(provider_id, booking_id, %window, %busy, "reservation contended");
                return Err(BookingError::Conflict {
                    window: *window,
                    reason: ConflictReason::InFlight(busy),
                });
            }
        };

        if !self.resolver.is_available(provider_id, window)? {
            tracing::info!(provider_id, booking_id, %window, "reservation rejected: unavailable");
            return Err(BookingError::Conflict {
                window: *window,
                reason: ConflictReason::Unavailable,
            });
        }

        let outcome = self
            .bookings
            .claim(provider_id, booking_id, window, Utc::now(), notes)?;
        match outcome {
            ClaimOutcome::Reserved(booking) => {
                tracing::info!(provider_id, booking_id, %window, "window reserved");
                Ok(booking)
            }
            ClaimOutcome::Conflict(existing) => {
                tracing::info!(
                    provider_id,
                    booking_id,
                    %window,
                    %existing,
                    "reservation rejected: overlap"
                );
                Err(BookingError::Conflict {
                    window: *window,
                    reason: ConflictReason::Reserved(existing),
                })
            }
            ClaimOutcome::StatusChanged(status) => Err(BookingError::InvalidTransition {
                from: status,
                to: BookingStatus::Confirmed,
            }),
            ClaimOutcome::Mismatch => Err(BookingError::validation(format!(
                "booking {booking_id} does not hold window {window} for provider {provider_id}"
            ))),
            ClaimOutcome::Missing => Err(BookingError::NotFound(format!("booking {booking_id}"))),
        }
    }
}
