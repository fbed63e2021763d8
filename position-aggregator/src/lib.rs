// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Hourly aggregation of trade periods into per-period positions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use core_types::types::{Position, Trade};
use thiserror::Error;
use trading_calendar::{CalendarError, TradingCalendar, PERIODS_PER_DAY};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Expected period count to be a multiple of 24, got {count} periods")]
    InvalidPeriodCount { count: usize },
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

/// Flattens every trade's periods, sums volumes per period, and labels each
/// total with the local wall-clock time that period starts on the trading
/// day. Output is ordered by ascending period.
///
/// The total period-record count must be a positive multiple of 24; anything
/// else is rejected before any arithmetic happens. Volumes are summed with
/// plain floating-point addition in input order and are not rounded here.
pub fn aggregate(
    trades: &[Trade],
    target_date: NaiveDate,
    calendar: &TradingCalendar,
) -> Result<Vec<Position>, AggregationError> {
    let count: usize = trades.iter().map(|trade| trade.periods.len()).sum();
    if count == 0 || count % PERIODS_PER_DAY as usize != 0 {
        return Err(AggregationError::InvalidPeriodCount { count });
    }

    let start = calendar.day_start(target_date)?;
    let mut totals: BTreeMap<u32, f64> = BTreeMap::new();
    for trade in trades {
        for slot in &trade.periods {
            *totals.entry(slot.period).or_insert(0.0) += slot.volume;
        }
    }

    totals
        .into_iter()
        .map(|(period, volume)| {
            let moment = calendar.period_instant(start, period)?;
            Ok(Position {
                period,
                local_time: TradingCalendar::format_hhmm(&moment),
                volume,
            })
        })
        .collect()
}
