use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::errors::BookingError;
use crate::models::availability::day_window;
use crate::models::{
    AvailabilityOverride, BlockedRange, GeneralAvailabilityRule, Window,
};
use crate::repo::{AvailabilityRepo, BookingRepo};

/// One provider's rules, overrides and blocks, loaded for a date range.
///
/// Precedence per date: a covering blocked range empties the day; otherwise
/// an override either replaces the weekly ranges (`is_available`) or cuts its
/// span out of them; otherwise the active weekly rules for the weekday apply.
#[derive(Debug, Clone, Default)]
pub struct ProviderCalendar {
    rules: Vec<GeneralAvailabilityRule>,
    overrides: HashMap<NaiveDate, AvailabilityOverride>,
    blocks: Vec<BlockedRange>,
}

impl ProviderCalendar {
    pub fn new(
        rules: Vec<GeneralAvailabilityRule>,
        overrides: Vec<AvailabilityOverride>,
        blocks: Vec<BlockedRange>,
    ) -> Self {
        Self {
            rules,
            overrides: overrides.into_iter().map(|o| (o.date, o)).collect(),
            blocks,
        }
    }

    pub fn is_blocked(&self, date: NaiveDate) -> bool {
        self.blocks.iter().any(|b| b.covers(date))
    }

    /// Bookable ranges on `date`, sorted and disjoint.
    pub fn ranges_on(&self, date: NaiveDate) -> Vec<Window> {
        if self.is_blocked(date) {
            return Vec::new();
        }

        let mut ranges: Vec<Window> = self
            .rules
            .iter()
            .filter(|r| r.applies_on(date))
            .filter_map(|r| r.slot.span_on(date))
            .collect();
        ranges.sort_by_key(|w| w.start);
        let ranges = merge_overlapping(&ranges);

        match self.overrides.get(&date).and_then(|o| o.span().map(|span| (o, span))) {
            Some((o, span)) if o.is_available => vec![span],
            Some((_, span)) => subtract_intervals(&ranges, &[span]),
            None => ranges,
        }
    }

    /// Calendar verdict for `window`: every date it touches must have a single
    /// range containing that date's part of the window.
    pub fn is_available(&self, window: &Window) -> bool {
        window.split_by_day().iter().all(|(date, piece)| {
            self.ranges_on(*date).iter().any(|range| range.contains(piece))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub windows: Vec<Window>,
}

/// Free windows of one provider, produced a day at a time.
///
/// Nothing is computed until the iterator is advanced. Cloning yields an
/// independent iterator positioned where the original was, so a fresh clone
/// taken before iteration replays the whole range.
#[derive(Debug, Clone)]
pub struct FreeWindows {
    calendar: Arc<ProviderCalendar>,
    reserved: Arc<Vec<Window>>,
    next: Option<NaiveDate>,
    last: NaiveDate,
}

impl Iterator for FreeWindows {
    type Item = DayAvailability;

    fn next(&mut self) -> Option<Self::Item> {
        let date = self.next.filter(|d| *d <= self.last)?;
        self.next = date.succ_opt();

        let ranges = self.calendar.ranges_on(date);
        let busy: Vec<Window> = match day_window(date) {
            Some(day) => self
                .reserved
                .iter()
                .filter(|w| w.overlaps(&day))
                .copied()
                .collect(),
            None => Vec::new(),
        };

        Some(DayAvailability {
            date,
            windows: subtract_intervals(&ranges, &busy),
        })
    }
}

/// Read-only availability queries. Holds no locks of its own.
#[derive(Clone)]
pub struct AvailabilityResolver {
    availability: Arc<dyn AvailabilityRepo>,
    bookings: Arc<dyn BookingRepo>,
}

impl AvailabilityResolver {
    pub fn new(availability: Arc<dyn AvailabilityRepo>, bookings: Arc<dyn BookingRepo>) -> Self {
        Self {
            availability,
            bookings,
        }
    }

    pub fn calendar(
        &self,
        provider_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProviderCalendar, BookingError> {
        Ok(ProviderCalendar::new(
            self.availability.rules(provider_id)?,
            self.availability.overrides(provider_id, from, to)?,
            self.availability.blocked_ranges(provider_id)?,
        ))
    }

    pub fn is_available(&self, provider_id: &str, window: &Window) -> Result<bool, BookingError> {
        let (from, to) = window.dates();
        let calendar = self.calendar(provider_id, from, to)?;
        Ok(calendar.is_available(window))
    }

    /// Calendar ranges minus held bookings for each date in `from..=to`.
    pub fn free_windows(
        &self,
        provider_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<FreeWindows, BookingError> {
        if to < from {
            return Err(BookingError::validation("`to` must not be before `from`"));
        }
        let calendar = self.calendar(provider_id, from, to)?;

        let span = match (day_window(from), day_window(to)) {
            (Some(first), Some(last)) => Window::new(first.start, last.end),
            _ => None,
        }
        .ok_or_else(|| BookingError::validation("date range out of bounds"))?;

        let mut reserved: Vec<Window> = self
            .bookings
            .reserved_overlapping(provider_id, &span, None)?
            .iter()
            .map(|b| b.window())
            .collect();
        reserved.sort_by_key(|w| w.start);

        tracing::debug!(
            provider_id,
            %from,
            %to,
            reserved = reserved.len(),
            "computing free windows"
        );

        Ok(FreeWindows {
            calendar: Arc::new(calendar),
            reserved: Arc::new(merge_overlapping(&reserved)),
            next: Some(from),
            last: to,
        })
    }
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_overlapping(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &window in sorted {
        if let Some(last) = merged.last_mut() {
            if window.start <= last.end {
                last.end = last.end.max(window.end);
                continue;
            }
        }
        merged.push(window);
    }
    merged
}

/// Remove every part of `base` covered by `to_remove`. Both inputs sorted by start.
pub fn subtract_intervals(base: &[Window], to_remove: &[Window]) -> Vec<Window> {
    let mut result = Vec::new();

    for b in base {
        let mut current_start = b.start;

        for r in to_remove {
            if r.end <= current_start || r.start >= b.end {
                continue;
            }
            if r.start > current_start {
                result.push(Window {
                    start: current_start,
                    end: r.start,
                });
            }
            current_start = current_start.max(r.end);
        }

        if current_start < b.end {
            result.push(Window {
                start: current_start,
                end: b.end,
            });
        }
    }

    result
}
