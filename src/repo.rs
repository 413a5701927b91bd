//! Storage seams of the booking core.
//!
//! The core only sees these traits; `SqliteStore` is the production
//! implementation and the provider/profile CRUD layer writes the same tables.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{
    AvailabilityOverride, BlockedRange, Booking, BookingOwner, BookingStatus, ClaimOutcome,
    GeneralAvailabilityRule, PricingBasis, Provider, StatusChange, Window,
};

pub trait ProviderRepo: Send + Sync {
    fn provider(&self, id: &str) -> anyhow::Result<Option<Provider>>;

    fn pricing_basis(
        &self,
        provider_id: &str,
        service_id: &str,
    ) -> anyhow::Result<Option<PricingBasis>>;
}

pub trait AvailabilityRepo: Send + Sync {
    fn rules(&self, provider_id: &str) -> anyhow::Result<Vec<GeneralAvailabilityRule>>;

    /// Overrides dated `from..=to`.
    fn overrides(
        &self,
        provider_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<AvailabilityOverride>>;

    fn blocked_ranges(&self, provider_id: &str) -> anyhow::Result<Vec<BlockedRange>>;
}

pub trait BookingRepo: Send + Sync {
    fn insert(&self, booking: &Booking) -> anyhow::Result<()>;

    fn get(&self, id: &str) -> anyhow::Result<Option<Booking>>;

    fn list(
        &self,
        owner: BookingOwner<'_>,
        status: Option<BookingStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<Booking>>;

    fn reserved_overlapping(
        &self,
        provider_id: &str,
        window: &Window,
        exclude_id: Option<&str>,
    ) -> anyhow::Result<Vec<Booking>>;

    /// Atomically confirm `booking_id` for `window` unless a held window overlaps.
    fn claim(
        &self,
        provider_id: &str,
        booking_id: &str,
        window: &Window,
        at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> anyhow::Result<ClaimOutcome>;

    /// Atomically apply `change` if the booking is still in `change.from`.
    fn apply_change(&self, booking_id: &str, change: &StatusChange) -> anyhow::Result<bool>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))
    }
}

impl ProviderRepo for SqliteStore {
    fn provider(&self, id: &str) -> anyhow::Result<Option<Provider>> {
        queries::get_provider(&*self.lock()?, id)
    }

    fn pricing_basis(
        &self,
        provider_id: &str,
        service_id: &str,
    ) -> anyhow::Result<Option<PricingBasis>> {
        queries::get_pricing_basis(&*self.lock()?, provider_id, service_id)
    }
}

impl AvailabilityRepo for SqliteStore {
    fn rules(&self, provider_id: &str) -> anyhow::Result<Vec<GeneralAvailabilityRule>> {
        queries::get_rules(&*self.lock()?, provider_id)
    }

    fn overrides(
        &self,
        provider_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<AvailabilityOverride>> {
        queries::get_overrides(&*self.lock()?, provider_id, from, to)
    }

    fn blocked_ranges(&self, provider_id: &str) -> anyhow::Result<Vec<BlockedRange>> {
        queries::get_blocked_ranges(&*self.lock()?, provider_id)
    }
}

impl BookingRepo for SqliteStore {
    fn insert(&self, booking: &Booking) -> anyhow::Result<()> {
        queries::insert_booking(&*self.lock()?, booking)
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<Booking>> {
        queries::get_booking_by_id(&*self.lock()?, id)
    }

    fn list(
        &self,
        owner: BookingOwner<'_>,
        status: Option<BookingStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<Booking>> {
        queries::list_bookings(&*self.lock()?, owner, status, limit)
    }

    fn reserved_overlapping(
        &self,
        provider_id: &str,
        window: &Window,
        exclude_id: Option<&str>,
    ) -> anyhow::Result<Vec<Booking>> {
        queries::get_reserved_overlapping(&*self.lock()?, provider_id, window, exclude_id)
    }

    fn claim(
        &self,
        provider_id: &str,
        booking_id: &str,
        window: &Window,
        at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> anyhow::Result<ClaimOutcome> {
        queries::claim_window(&*self.lock()?, provider_id, booking_id, window, &at, notes)
    }

    fn apply_change(&self, booking_id: &str, change: &StatusChange) -> anyhow::Result<bool> {
        queries::apply_status_change(&*self.lock()?, booking_id, change)
    }
}
