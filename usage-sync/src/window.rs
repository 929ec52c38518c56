use std::fmt;

use time::{Date, Month, OffsetDateTime, Time};

/// Number of windows the one-year backfill is split into.
pub const BACKFILL_WINDOWS: u8 = 4;
const MONTHS_PER_WINDOW: i32 = 3;

/// Half-open fetch interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl SyncWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    pub fn start_epoch_seconds(&self) -> i64 {
        self.start.unix_timestamp()
    }

    pub fn end_epoch_seconds(&self) -> i64 {
        self.end.unix_timestamp()
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Shift `ts` by `months` calendar months, clamping the day to the length of
/// the target month (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(ts: OffsetDateTime, months: i32) -> OffsetDateTime {
    let total = ts.year() * 12 + i32::from(u8::from(ts.month())) - 1 + months;
    let year = total.div_euclid(12);
    // `rem_euclid(12) + 1` is always within 1..=12.
    let month = Month::try_from((total.rem_euclid(12) + 1) as u8).unwrap_or(Month::January);
    let day = ts.day().min(month.length(year));

    match Date::from_calendar_date(year, month, day) {
        Ok(date) => ts.replace_date(date),
        Err(_) => ts,
    }
}

/// Windows covering the trailing year ending at `now`.
///
/// Boundaries are computed from the year-ago instant rather than chained, and
/// the final window ends at `now` exactly.
pub fn backfill_windows(now: OffsetDateTime) -> Vec<SyncWindow> {
    let start = add_months(now, -12);
    let count = i32::from(BACKFILL_WINDOWS);

    (0..count)
        .map(|i| {
            let window_start = add_months(start, MONTHS_PER_WINDOW * i);
            let window_end = if i + 1 < count {
                add_months(start, MONTHS_PER_WINDOW * (i + 1))
            } else {
                now
            };
            SyncWindow::new(window_start, window_end)
        })
        .collect()
}

/// Window re-fetching from the start of `last_bucket` (UTC) up to `now`.
pub fn delta_window(last_bucket: Date, now: OffsetDateTime) -> SyncWindow {
    let start = last_bucket.with_time(Time::MIDNIGHT).assume_utc();
    SyncWindow::new(start, now)
}
