use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PricingBasis, Window};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub service_id: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub status: BookingStatus,
    pub estimated_price: Decimal,
    pub final_price: Option<Decimal>,
    pub pricing: PricingBasis,
    pub quantity: Option<Decimal>,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn window(&self) -> Window {
        Window {
            start: self.start_datetime,
            end: self.end_datetime,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rescheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Statuses whose window is exclusively claimed for the provider.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::InProgress)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking request as submitted by the customer-facing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_id: String,
    pub provider_id: String,
    pub service_id: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub to_status: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_datetime: Option<DateTime<Utc>>,
}

/// A validated, non-reserving status change, applied only if the booking is
/// still in `from`.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    /// New window for a reschedule, with `estimated_price` repriced for it.
    pub window: Option<Window>,
    pub estimated_price: Option<Decimal>,
    pub final_price: Option<Decimal>,
}

/// Whose bookings a list query returns.
#[derive(Debug, Clone, Copy)]
pub enum BookingOwner<'a> {
    Provider(&'a str),
    Customer(&'a str),
}

/// Result of an atomic attempt to confirm a booking's window.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Reserved(Booking),
    /// Overlaps this held window.
    Conflict(Window),
    /// The booking is no longer in a reservable status.
    StatusChanged(BookingStatus),
    /// The booking row belongs to another provider or window than requested.
    Mismatch,
    Missing,
}

/// Published on every booking creation and status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub booking_id: String,
    pub provider_id: String,
    pub customer_id: String,
    pub status: BookingStatus,
    pub at: DateTime<Utc>,
}

impl From<&Booking> for BookingEvent {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id.clone(),
            provider_id: booking.provider_id.clone(),
            customer_id: booking.customer_id.clone(),
            status: booking.status,
            at: booking.updated_at,
        }
    }
}
