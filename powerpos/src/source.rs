//! Built-in trade source used when no upstream trading API is wired in.
//!
//! Produces a deterministic full trading day so the service can run end to
//! end on its own: one trade per extraction with periods 1..=24 and a
//! volume profile that peaks mid-day. Swap this for a real client by
//! implementing `TradeSource` against the trading API and wiring it in
//! `main`.

use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::types::{Trade, TradePeriod};
use extraction_engine::{BoxError, TradeSource};
use log::debug;
use trading_calendar::PERIODS_PER_DAY;

pub struct SimulatedTradeSource;

#[async_trait]
impl TradeSource for SimulatedTradeSource {
    async fn fetch(&self, target_date: NaiveDate) -> Result<Vec<Trade>, BoxError> {
        debug!("simulating trades for {target_date}");
        let periods = (1..=PERIODS_PER_DAY)
            .map(|period| TradePeriod {
                period,
                volume: profile(period),
            })
            .collect();
        Ok(vec![Trade {
            trade_date: target_date,
            periods,
        }])
    }
}

/// Symmetric ramp peaking at mid-day, in whole MWh.
fn profile(period: u32) -> f64 {
    let distance_from_peak = (i64::from(period) - 12).unsigned_abs();
    f64::from(100u32.saturating_sub(distance_from_peak as u32 * 5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_one_full_trading_day() {
        let trades = SimulatedTradeSource
            .fetch(NaiveDate::from_ymd_opt(2025, 12, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].periods.len(), 24);
        assert_eq!(trades[0].periods[11].volume, 100.0);
        assert!(trades[0].periods.iter().all(|p| p.volume >= 0.0));
    }
}
