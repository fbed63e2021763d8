// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Trading-day time model: the 23:00 prior-day anchor, period arithmetic
//! across daylight-saving transitions, and local display formatting.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::warn;
use thiserror::Error;

/// Number of hourly periods in one trading day.
pub const PERIODS_PER_DAY: u32 = 24;

/// Upper bound when probing past a daylight-saving gap. Real gaps are an
/// hour or two; this only guards against a defective zone table.
const GAP_PROBE_LIMIT_MINUTES: i64 = 24 * 60;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("period {period} is out of range (expected 1..=24)")]
    PeriodOutOfRange { period: u32 },
    #[error("no calendar day precedes {date}")]
    DayUnderflow { date: NaiveDate },
}

/// Calendar-aware mapping between trading dates, periods, and wall-clock
/// instants in one configured zone.
///
/// The trading day for date `d` starts at 23:00 local on `d - 1`. Period
/// `k` starts `k - 1` *physical* hours after that anchor, so period labels
/// follow observed local time through transitions: the fall-back day shows
/// a repeated `01:00`, the spring-forward day skips one.
#[derive(Debug, Clone, Copy)]
pub struct TradingCalendar {
    zone: Tz,
}

impl TradingCalendar {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// The zoned instant the trading day for `date` begins: 23:00 on the
    /// preceding calendar day. An ambiguous wall clock (fall-back overlap)
    /// resolves to the earlier mapping; a skipped one (spring-forward gap)
    /// resolves to the first valid instant after the gap.
    pub fn day_start(&self, date: NaiveDate) -> Result<DateTime<Tz>, CalendarError> {
        let prior = date
            .pred_opt()
            .ok_or(CalendarError::DayUnderflow { date })?;
        let wall = prior.and_hms_opt(23, 0, 0).expect("valid wall clock");
        Ok(resolve_wall_clock(self.zone, wall))
    }

    /// The zoned instant period `period` begins, measured as physical hours
    /// from the trading-day start.
    pub fn period_instant(
        &self,
        start: DateTime<Tz>,
        period: u32,
    ) -> Result<DateTime<Tz>, CalendarError> {
        if !(1..=PERIODS_PER_DAY).contains(&period) {
            return Err(CalendarError::PeriodOutOfRange { period });
        }
        Ok(start + Duration::hours(i64::from(period) - 1))
    }

    /// Two-digit 24-hour local rendering, e.g. `23:00`.
    pub fn format_hhmm(moment: &DateTime<Tz>) -> String {
        moment.format("%H:%M").to_string()
    }

    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.zone)
    }

    /// The trading date an instant belongs to: its local calendar date.
    pub fn date_of(&self, utc: DateTime<Utc>) -> NaiveDate {
        self.to_local(utc).date_naive()
    }
}

fn resolve_wall_clock(zone: Tz, wall: NaiveDateTime) -> DateTime<Tz> {
    match zone.from_local_datetime(&wall) {
        LocalResult::Single(moment) => moment,
        LocalResult::Ambiguous(earlier, later) => {
            warn!(
                "wall clock {wall} is ambiguous in {zone} ({} vs {}); using the earlier mapping",
                earlier, later
            );
            earlier
        }
        LocalResult::None => {
            let resolved = first_instant_after_gap(zone, wall);
            warn!("wall clock {wall} does not exist in {zone}; using {resolved}");
            resolved
        }
    }
}

fn first_instant_after_gap(zone: Tz, wall: NaiveDateTime) -> DateTime<Tz> {
    let mut probe = wall;
    for _ in 0..GAP_PROBE_LIMIT_MINUTES {
        probe += Duration::minutes(1);
        match zone.from_local_datetime(&probe) {
            LocalResult::Single(moment) | LocalResult::Ambiguous(moment, _) => return moment,
            LocalResult::None => continue,
        }
    }
    // Unreachable with a sane zone table; pin the instant to the UTC reading.
    zone.from_utc_datetime(&wall)
}
