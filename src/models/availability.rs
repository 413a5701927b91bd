use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Calendar dates (UTC) this window touches, first to last.
    pub fn dates(&self) -> (NaiveDate, NaiveDate) {
        let last_instant = self.end - Duration::seconds(1);
        (self.start.date_naive(), last_instant.date_naive().max(self.start.date_naive()))
    }

    /// Cut the window at each UTC midnight it crosses.
    pub fn split_by_day(&self) -> Vec<(NaiveDate, Window)> {
        let mut pieces = Vec::new();
        let mut date = self.start.date_naive();
        loop {
            let Some(day) = day_window(date) else { break };
            if day.start >= self.end {
                break;
            }
            let piece = Window {
                start: self.start.max(day.start),
                end: self.end.min(day.end),
            };
            if piece.start < piece.end {
                pieces.push((date, piece));
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        pieces
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// The whole of `date`, midnight to midnight.
pub fn day_window(date: NaiveDate) -> Option<Window> {
    let next = date.succ_opt()?;
    Window::new(
        date.and_time(NaiveTime::MIN).and_utc(),
        next.and_time(NaiveTime::MIN).and_utc(),
    )
}

/// `[start, end)` on `date`. An `end` of 00:00 is read as the midnight that
/// closes the day.
pub fn time_range_on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Option<Window> {
    let start_dt = date.and_time(start).and_utc();
    let end_dt = if end == NaiveTime::MIN {
        date.succ_opt()?.and_time(NaiveTime::MIN).and_utc()
    } else {
        date.and_time(end).and_utc()
    };
    Window::new(start_dt, end_dt)
}

/// Part of the day a recurring rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Explicit { start: NaiveTime, end: NaiveTime },
}

impl TimeSlot {
    pub fn bounds(&self) -> (NaiveTime, NaiveTime) {
        let hm = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
        match self {
            TimeSlot::Morning => (hm(8), hm(12)),
            TimeSlot::Afternoon => (hm(12), hm(17)),
            TimeSlot::Evening => (hm(17), hm(21)),
            TimeSlot::Explicit { start, end } => (*start, *end),
        }
    }

    pub fn span_on(&self, date: NaiveDate) -> Option<Window> {
        let (start, end) = self.bounds();
        time_range_on(date, start, end)
    }

    /// Storage key; unique per provider and weekday.
    pub fn key(&self) -> String {
        match self {
            TimeSlot::Morning => "morning".to_string(),
            TimeSlot::Afternoon => "afternoon".to_string(),
            TimeSlot::Evening => "evening".to_string(),
            TimeSlot::Explicit { start, end } => {
                format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
            }
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "morning" => Ok(TimeSlot::Morning),
            "afternoon" => Ok(TimeSlot::Afternoon),
            "evening" => Ok(TimeSlot::Evening),
            other => {
                let (start, end) = other
                    .split_once('-')
                    .ok_or_else(|| anyhow::anyhow!("invalid time slot: {other}"))?;
                let start = NaiveTime::parse_from_str(start, "%H:%M")?;
                let end = NaiveTime::parse_from_str(end, "%H:%M")?;
                if end != NaiveTime::MIN && end <= start {
                    return Err(anyhow::anyhow!("time slot ends before it starts: {other}"));
                }
                Ok(TimeSlot::Explicit { start, end })
            }
        }
    }
}

/// Recurring weekly default. `day_of_week` counts from Sunday (0) to Saturday (6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralAvailabilityRule {
    pub provider_id: String,
    pub day_of_week: u8,
    pub slot: TimeSlot,
    pub is_active: bool,
}

impl GeneralAvailabilityRule {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.is_active && u32::from(self.day_of_week) == date.weekday().num_days_from_sunday()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Regular,
    Custom,
    Holiday,
}

impl OverrideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideKind::Regular => "regular",
            OverrideKind::Custom => "custom",
            OverrideKind::Holiday => "holiday",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "custom" => OverrideKind::Custom,
            "holiday" => OverrideKind::Holiday,
            _ => OverrideKind::Regular,
        }
    }
}

/// Date-specific exception to the weekly rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub provider_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub kind: OverrideKind,
}

impl AvailabilityOverride {
    pub fn span(&self) -> Option<Window> {
        time_range_on(self.date, self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Yearly,
    Monthly,
    Weekly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Yearly => "yearly",
            Recurrence::Monthly => "monthly",
            Recurrence::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yearly" => Some(Recurrence::Yearly),
            "monthly" => Some(Recurrence::Monthly),
            "weekly" => Some(Recurrence::Weekly),
            _ => None,
        }
    }
}

/// Dates the provider cannot be booked, inclusive at both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub provider_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub recurrence: Option<Recurrence>,
}

impl BlockedRange {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Whether `date` falls in this range or, for recurring ranges, in the
    /// occurrence recomputed for that date's year, month or week.
    pub fn covers(&self, date: NaiveDate) -> bool {
        if date < self.start_date {
            return false;
        }
        let len = (self.end_date - self.start_date).num_days();
        let within = |start: NaiveDate| start <= date && date <= start + Duration::days(len);

        match self.recurrence {
            None => date <= self.end_date,
            Some(Recurrence::Weekly) => {
                len >= 6 || (0..=len).contains(&((date - self.start_date).num_days() % 7))
            }
            Some(Recurrence::Monthly) => {
                let (year, month) = (date.year(), date.month());
                let previous = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
                [previous, (year, month)]
                    .into_iter()
                    .filter_map(|(y, m)| clamped_date(y, m, self.start_date.day()))
                    .any(within)
            }
            Some(Recurrence::Yearly) => [date.year() - 1, date.year()]
                .into_iter()
                .filter_map(|y| clamped_date(y, self.start_date.month(), self.start_date.day()))
                .any(within),
        }
    }
}

/// `day` of the given month, pulled back to the month's last day when it
/// does not exist (the 31st in April, the 29th of February).
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (28..=day.max(28))
        .rev()
        .map(|d| d.min(day))
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
}
