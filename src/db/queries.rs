use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

use crate::models::{
    AvailabilityOverride, BlockedRange, Booking, BookingOwner, BookingStatus, ClaimOutcome,
    GeneralAvailabilityRule, OverrideKind, PriceUnit, PricingBasis, Provider, Recurrence, Service,
    StatusChange, TimeSlot, Window,
};

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

const BOOKING_COLUMNS: &str = "id, customer_id, provider_id, service_id, start_datetime, end_datetime, status, \
     estimated_price, final_price, cost_price, price_unit, commission_percentage, vat_rate, quantity, notes, \
     requested_at, confirmed_at, started_at, completed_at, cancelled_at, cancellation_reason, updated_at";

pub fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .with_context(|| format!("invalid timestamp in database: {s}"))?
        .and_utc())
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_dec(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal in database: {s}"))
}

fn parse_opt_dec(s: Option<String>) -> anyhow::Result<Option<Decimal>> {
    s.as_deref().map(parse_dec).transpose()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .with_context(|| format!("invalid date in database: {s}"))
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .with_context(|| format!("invalid time in database: {s}"))
}

// ── Providers & Services ──

pub fn insert_provider(conn: &Connection, provider: &Provider) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO providers (id, name, service_radius, is_active) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           service_radius = excluded.service_radius,
           is_active = excluded.is_active",
        params![
            provider.id,
            provider.name,
            provider.service_radius.map(|r| r.to_string()),
            provider.is_active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_provider(conn: &Connection, id: &str) -> anyhow::Result<Option<Provider>> {
    let result = conn.query_row(
        "SELECT id, name, service_radius, is_active FROM providers WHERE id = ?1",
        params![id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i32>(3)? != 0,
            ))
        },
    );

    match result {
        Ok((id, name, radius, is_active)) => Ok(Some(Provider {
            id,
            name,
            service_radius: parse_opt_dec(radius)?,
            is_active,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, name, cost_price, price_unit, commission_percentage, vat_rate)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           cost_price = excluded.cost_price,
           price_unit = excluded.price_unit,
           commission_percentage = excluded.commission_percentage,
           vat_rate = excluded.vat_rate",
        params![
            service.id,
            service.name,
            service.cost_price.to_string(),
            service.price_unit.as_str(),
            service.commission_percentage.to_string(),
            service.vat_rate.to_string(),
        ],
    )?;
    Ok(())
}

pub fn offer_service(
    conn: &Connection,
    provider_id: &str,
    service_id: &str,
    custom_price: Option<Decimal>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO provider_services (provider_id, service_id, custom_price) VALUES (?1, ?2, ?3)
         ON CONFLICT(provider_id, service_id) DO UPDATE SET custom_price = excluded.custom_price",
        params![provider_id, service_id, custom_price.map(|p| p.to_string())],
    )?;
    Ok(())
}

/// Current rates for a provider's service. The provider's custom price wins
/// over the catalogue tier.
pub fn get_pricing_basis(
    conn: &Connection,
    provider_id: &str,
    service_id: &str,
) -> anyhow::Result<Option<PricingBasis>> {
    let result = conn.query_row(
        "SELECT COALESCE(ps.custom_price, s.cost_price), s.price_unit, s.commission_percentage, s.vat_rate
         FROM provider_services ps
         INNER JOIN services s ON s.id = ps.service_id
         WHERE ps.provider_id = ?1 AND ps.service_id = ?2",
        params![provider_id, service_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    );

    match result {
        Ok((cost, unit, commission, vat)) => Ok(Some(PricingBasis {
            cost_price: parse_dec(&cost)?,
            price_unit: PriceUnit::parse(&unit)?,
            commission_percentage: parse_dec(&commission)?,
            vat_rate: parse_dec(&vat)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Availability ──

pub fn insert_rule(conn: &Connection, rule: &GeneralAvailabilityRule) -> anyhow::Result<()> {
    anyhow::ensure!(rule.day_of_week <= 6, "day_of_week out of range: {}", rule.day_of_week);
    conn.execute(
        "INSERT INTO availability_rules (provider_id, day_of_week, slot, is_active) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(provider_id, day_of_week, slot) DO UPDATE SET is_active = excluded.is_active",
        params![
            rule.provider_id,
            rule.day_of_week,
            rule.slot.key(),
            rule.is_active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_rules(
    conn: &Connection,
    provider_id: &str,
) -> anyhow::Result<Vec<GeneralAvailabilityRule>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, day_of_week, slot, is_active FROM availability_rules
         WHERE provider_id = ?1 ORDER BY day_of_week, slot",
    )?;

    let rows = stmt.query_map(params![provider_id], |row| {
        let provider_id: String = row.get(0)?;
        let day_of_week: u8 = row.get(1)?;
        let slot: String = row.get(2)?;
        let is_active = row.get::<_, i32>(3)? != 0;
        Ok(TimeSlot::parse(&slot).map(|slot| GeneralAvailabilityRule {
            provider_id,
            day_of_week,
            slot,
            is_active,
        }))
    })?;

    let mut rules = vec![];
    for row in rows {
        rules.push(row??);
    }
    Ok(rules)
}

pub fn upsert_override(conn: &Connection, ov: &AvailabilityOverride) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO availability_overrides (provider_id, date, start_time, end_time, is_available, kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(provider_id, date) DO UPDATE SET
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           is_available = excluded.is_available,
           kind = excluded.kind",
        params![
            ov.provider_id,
            ov.date.format(DATE_FORMAT).to_string(),
            ov.start_time.format(TIME_FORMAT).to_string(),
            ov.end_time.format(TIME_FORMAT).to_string(),
            ov.is_available as i32,
            ov.kind.as_str(),
        ],
    )?;
    Ok(())
}

pub fn get_overrides(
    conn: &Connection,
    provider_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<Vec<AvailabilityOverride>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, date, start_time, end_time, is_available, kind FROM availability_overrides
         WHERE provider_id = ?1 AND date >= ?2 AND date <= ?3 ORDER BY date",
    )?;

    let rows = stmt.query_map(
        params![
            provider_id,
            from.format(DATE_FORMAT).to_string(),
            to.format(DATE_FORMAT).to_string(),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i32>(4)? != 0,
                row.get::<_, String>(5)?,
            ))
        },
    )?;

    let mut overrides = vec![];
    for row in rows {
        let (provider_id, date, start, end, is_available, kind) = row?;
        overrides.push(AvailabilityOverride {
            provider_id,
            date: parse_date(&date)?,
            start_time: parse_time(&start)?,
            end_time: parse_time(&end)?,
            is_available,
            kind: OverrideKind::parse(&kind),
        });
    }
    Ok(overrides)
}

pub fn insert_blocked_range(conn: &Connection, range: &BlockedRange) -> anyhow::Result<i64> {
    anyhow::ensure!(
        range.start_date <= range.end_date,
        "blocked range ends before it starts"
    );
    conn.execute(
        "INSERT INTO blocked_ranges (provider_id, start_date, end_date, is_recurring, recurrence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            range.provider_id,
            range.start_date.format(DATE_FORMAT).to_string(),
            range.end_date.format(DATE_FORMAT).to_string(),
            range.is_recurring() as i32,
            range.recurrence.map(|r| r.as_str()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_blocked_ranges(
    conn: &Connection,
    provider_id: &str,
) -> anyhow::Result<Vec<BlockedRange>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, start_date, end_date, is_recurring, recurrence FROM blocked_ranges
         WHERE provider_id = ?1 ORDER BY start_date",
    )?;

    let rows = stmt.query_map(params![provider_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i32>(3)? != 0,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut ranges = vec![];
    for row in rows {
        let (provider_id, start, end, is_recurring, recurrence) = row?;
        let recurrence = if is_recurring {
            recurrence.as_deref().and_then(Recurrence::parse)
        } else {
            None
        };
        ranges.push(BlockedRange {
            provider_id,
            start_date: parse_date(&start)?,
            end_date: parse_date(&end)?,
            recurrence,
        });
    }
    Ok(ranges)
}

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        ),
        params![
            booking.id,
            booking.customer_id,
            booking.provider_id,
            booking.service_id,
            fmt_ts(&booking.start_datetime),
            fmt_ts(&booking.end_datetime),
            booking.status.as_str(),
            booking.estimated_price.to_string(),
            booking.final_price.map(|p| p.to_string()),
            booking.pricing.cost_price.to_string(),
            booking.pricing.price_unit.as_str(),
            booking.pricing.commission_percentage.to_string(),
            booking.pricing.vat_rate.to_string(),
            booking.quantity.map(|q| q.to_string()),
            booking.notes,
            fmt_ts(&booking.requested_at),
            booking.confirmed_at.as_ref().map(fmt_ts),
            booking.started_at.as_ref().map(fmt_ts),
            booking.completed_at.as_ref().map(fmt_ts),
            booking.cancelled_at.as_ref().map(fmt_ts),
            booking.cancellation_reason,
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_bookings(
    conn: &Connection,
    owner: BookingOwner<'_>,
    status: Option<BookingStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (column, id) = match owner {
        BookingOwner::Provider(id) => ("provider_id", id),
        BookingOwner::Customer(id) => ("customer_id", id),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE {column} = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY start_datetime DESC LIMIT ?3"
    ))?;

    let rows = stmt.query_map(params![id, status.map(|s| s.as_str()), limit], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Confirmed or in-progress bookings of `provider_id` overlapping `window`,
/// earliest first.
pub fn get_reserved_overlapping(
    conn: &Connection,
    provider_id: &str,
    window: &Window,
    exclude_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE provider_id = ?1
           AND status IN ('confirmed', 'in_progress')
           AND start_datetime < ?3
           AND ?2 < end_datetime
           AND (?4 IS NULL OR id != ?4)
         ORDER BY start_datetime ASC"
    ))?;

    let rows = stmt.query_map(
        params![
            provider_id,
            fmt_ts(&window.start),
            fmt_ts(&window.end),
            exclude_id,
        ],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Confirm a pending or rescheduled booking if no held window of the same
/// provider overlaps it. Check and update run in one immediate transaction.
pub fn claim_window(
    conn: &Connection,
    provider_id: &str,
    booking_id: &str,
    window: &Window,
    at: &DateTime<Utc>,
    notes: Option<&str>,
) -> anyhow::Result<ClaimOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let Some(booking) = get_booking_by_id(&tx, booking_id)? else {
        return Ok(ClaimOutcome::Missing);
    };
    if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Rescheduled) {
        return Ok(ClaimOutcome::StatusChanged(booking.status));
    }
    if booking.provider_id != provider_id || booking.window() != *window {
        return Ok(ClaimOutcome::Mismatch);
    }

    let existing = get_reserved_overlapping(&tx, provider_id, window, Some(booking_id))?;
    if let Some(held) = existing.first() {
        return Ok(ClaimOutcome::Conflict(held.window()));
    }

    let now = fmt_ts(at);
    let updated = tx.execute(
        "UPDATE bookings SET
           status = 'confirmed',
           confirmed_at = ?1,
           updated_at = ?1,
           notes = COALESCE(?4, notes)
         WHERE id = ?2 AND status = ?3",
        params![now, booking_id, booking.status.as_str(), notes],
    );
    match updated {
        Ok(_) => {}
        Err(e) if is_overlap_violation(&e) => {
            // A writer outside this check holds the window; report it if visible
            let held = get_reserved_overlapping(&tx, provider_id, window, Some(booking_id))?
                .first()
                .map_or(*window, Booking::window);
            return Ok(ClaimOutcome::Conflict(held));
        }
        Err(e) => return Err(e.into()),
    }

    let confirmed = get_booking_by_id(&tx, booking_id)?
        .ok_or_else(|| anyhow::anyhow!("booking vanished during reservation: {booking_id}"))?;
    tx.commit()?;

    Ok(ClaimOutcome::Reserved(confirmed))
}

/// Apply a non-reserving transition if the booking is still in `change.from`.
/// Returns false when it is not, leaving the row untouched.
pub fn apply_status_change(
    conn: &Connection,
    booking_id: &str,
    change: &StatusChange,
) -> anyhow::Result<bool> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let now = fmt_ts(&change.at);

    let count = tx.execute(
        "UPDATE bookings SET
           status = ?1,
           updated_at = ?2,
           notes = COALESCE(?3, notes),
           cancellation_reason = COALESCE(?4, cancellation_reason),
           final_price = COALESCE(?5, final_price),
           estimated_price = COALESCE(?6, estimated_price)
         WHERE id = ?7 AND status = ?8",
        params![
            change.to.as_str(),
            now,
            change.notes,
            change.cancellation_reason,
            change.final_price.map(|p| p.to_string()),
            change.estimated_price.map(|p| p.to_string()),
            booking_id,
            change.from.as_str(),
        ],
    )?;
    if count == 0 {
        return Ok(false);
    }

    if let Some(column) = timestamp_column(change.to) {
        tx.execute(
            &format!("UPDATE bookings SET {column} = ?1 WHERE id = ?2"),
            params![now, booking_id],
        )?;
    }

    if let Some(window) = &change.window {
        tx.execute(
            "UPDATE bookings SET start_datetime = ?1, end_datetime = ?2 WHERE id = ?3",
            params![fmt_ts(&window.start), fmt_ts(&window.end), booking_id],
        )?;
    }

    tx.commit()?;
    Ok(true)
}

fn timestamp_column(status: BookingStatus) -> Option<&'static str> {
    match status {
        BookingStatus::Confirmed => Some("confirmed_at"),
        BookingStatus::InProgress => Some("started_at"),
        BookingStatus::Completed => Some("completed_at"),
        BookingStatus::Cancelled => Some("cancelled_at"),
        BookingStatus::Pending | BookingStatus::Rescheduled => None,
    }
}

pub fn is_overlap_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("reservation overlap")
    )
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(6)?;
    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown booking status in database: {status_str}"))?;

    Ok(Booking {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        provider_id: row.get(2)?,
        service_id: row.get(3)?,
        start_datetime: parse_ts(&row.get::<_, String>(4)?)?,
        end_datetime: parse_ts(&row.get::<_, String>(5)?)?,
        status,
        estimated_price: parse_dec(&row.get::<_, String>(7)?)?,
        final_price: parse_opt_dec(row.get(8)?)?,
        pricing: PricingBasis {
            cost_price: parse_dec(&row.get::<_, String>(9)?)?,
            price_unit: PriceUnit::parse(&row.get::<_, String>(10)?)?,
            commission_percentage: parse_dec(&row.get::<_, String>(11)?)?,
            vat_rate: parse_dec(&row.get::<_, String>(12)?)?,
        },
        quantity: parse_opt_dec(row.get(13)?)?,
        notes: row.get(14)?,
        requested_at: parse_ts(&row.get::<_, String>(15)?)?,
        confirmed_at: parse_opt_ts(row.get(16)?)?,
        started_at: parse_opt_ts(row.get(17)?)?,
        completed_at: parse_opt_ts(row.get(18)?)?,
        cancelled_at: parse_opt_ts(row.get(19)?)?,
        cancellation_reason: row.get(20)?,
        updated_at: parse_ts(&row.get::<_, String>(21)?)?,
    })
}
