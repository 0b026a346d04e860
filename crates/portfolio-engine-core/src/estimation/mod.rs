pub mod covariance;
pub mod returns;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::{with_metadata, AssetSeries, ComputationOutput};
use crate::EngineResult;

use self::returns::MIN_COMMON_DATES;

/// Calendar gap between aligned observations worth flagging.
const GAP_WARNING_DAYS: i64 = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to return/covariance estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationInput {
    /// Closing-price history per symbol, as delivered by the price provider.
    pub series: Vec<AssetSeries>,
    /// Calendar days of history to retain, counted back from the latest date.
    pub lookback_days: u32,
    /// Annualization factor (default 252).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods_per_year: Option<u32>,
}

/// A symbol removed from the universe and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedSymbol {
    pub symbol: String,
    pub reason: String,
}

/// Annualized statistics for the retained universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEstimate {
    /// Retained symbols; every vector and matrix below uses this order.
    pub symbols: Vec<String>,
    /// Annualized mean simple return per symbol.
    pub expected_returns: Vec<Decimal>,
    /// Annualized sample covariance.
    pub covariance_matrix: Vec<Vec<Decimal>>,
    /// Per-period returns on the common dates (periods x assets).
    pub periodic_returns: Vec<Vec<Decimal>>,
    pub periods_per_year: u32,
    pub as_of: NaiveDate,
    /// Number of dates shared by every retained symbol.
    pub common_dates: usize,
    pub dropped: Vec<DroppedSymbol>,
    /// True when any statistic had to be replaced to stay finite.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Turn closing-price histories into annualized expected returns and a
/// covariance matrix.
///
/// Symbols with too little history, or no overlap with the rest of the
/// universe, are dropped with a warning. Fails when fewer than two symbols
/// survive or they share too few dates.
pub fn estimate(input: &EstimationInput) -> EngineResult<ComputationOutput<MarketEstimate>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.lookback_days == 0 {
        return Err(EngineError::configuration(
            "lookback_days",
            "must be positive",
        ));
    }
    let periods_per_year = input.periods_per_year.unwrap_or(252);
    if periods_per_year == 0 {
        return Err(EngineError::configuration(
            "periods_per_year",
            "must be positive",
        ));
    }
    returns::validate_series(&input.series)?;

    let as_of = input
        .series
        .iter()
        .filter_map(|s| s.latest_date())
        .max()
        .ok_or_else(|| EngineError::Estimation("No price observations supplied".into()))?;

    // --- Truncate and drop short histories ---
    let mut dropped: Vec<DroppedSymbol> = Vec::new();
    let mut usable: Vec<AssetSeries> = Vec::new();
    for s in &input.series {
        let t = returns::truncate(s, as_of, input.lookback_days);
        if t.observations.len() < 2 {
            let reason = format!(
                "{} observations within {} days of {}; at least 2 required",
                t.observations.len(),
                input.lookback_days,
                as_of
            );
            warn!(symbol = %s.symbol, %reason, "dropping symbol from universe");
            warnings.push(format!("Dropped {}: {}", s.symbol, reason));
            dropped.push(DroppedSymbol {
                symbol: s.symbol.clone(),
                reason,
            });
        } else {
            usable.push(t);
        }
    }

    // --- Align on common dates ---
    let alignment = returns::align(&usable);
    for &i in &alignment.dropped {
        let reason = "no usable date overlap with the rest of the universe".to_string();
        warn!(symbol = %usable[i].symbol, %reason, "dropping symbol from universe");
        warnings.push(format!("Dropped {}: {}", usable[i].symbol, reason));
        dropped.push(DroppedSymbol {
            symbol: usable[i].symbol.clone(),
            reason,
        });
    }

    let retained: Vec<&AssetSeries> = alignment.retained.iter().map(|&i| &usable[i]).collect();
    if retained.len() < 2 {
        return Err(EngineError::Estimation(format!(
            "At least 2 symbols with sufficient history required, {} remain",
            retained.len()
        )));
    }
    let dates = &alignment.common_dates;
    if dates.len() < MIN_COMMON_DATES {
        return Err(EngineError::Estimation(format!(
            "Insufficient overlapping observations: {} common dates across {} symbols, at least {} required",
            dates.len(),
            retained.len(),
            MIN_COMMON_DATES
        )));
    }

    // --- Flag gaps; nothing is interpolated ---
    for s in &retained {
        let excluded = s.observations.len() - dates.len();
        if excluded > 0 {
            warnings.push(format!(
                "{}: {} observations outside the common date set were excluded",
                s.symbol, excluded
            ));
        }
    }
    if let Some((gap_start, days)) = returns::largest_gap(dates) {
        if days > GAP_WARNING_DAYS {
            warnings.push(format!(
                "Gap of {} calendar days in common history after {}",
                days, gap_start
            ));
        }
    }

    // --- Returns and moments ---
    let symbols: Vec<String> = retained.iter().map(|s| s.symbol.clone()).collect();
    let columns: Vec<Vec<Option<Decimal>>> = retained
        .iter()
        .map(|s| returns::simple_returns(&returns::closes_on(s, dates)))
        .collect();

    let moments = covariance::annualized_moments(&symbols, &columns, periods_per_year);
    let degraded = !moments.substitutions.is_empty();
    for note in &moments.substitutions {
        warn!(substitution = %note, "non-finite statistic replaced");
        warnings.push(format!("Degraded estimate: {}", note));
    }

    let periods = dates.len() - 1;
    let periodic_returns: Vec<Vec<Decimal>> = (0..periods)
        .map(|t| {
            columns
                .iter()
                .map(|col| col[t].unwrap_or(Decimal::ZERO))
                .collect()
        })
        .collect();

    debug!(
        symbols = symbols.len(),
        periods,
        degraded,
        "estimated return moments"
    );

    let output = MarketEstimate {
        symbols,
        expected_returns: moments.expected_returns,
        covariance_matrix: moments.covariance,
        periodic_returns,
        periods_per_year,
        as_of,
        common_dates: dates.len(),
        dropped,
        degraded,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sample mean and covariance of simple returns on common dates",
        &serde_json::json!({
            "lookback_days": input.lookback_days,
            "periods_per_year": periods_per_year,
            "requested_symbols": input.series.len(),
            "as_of": as_of.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceObservation;
    use rust_decimal_macros::dec;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(n)
    }

    fn series_from(symbol: &str, start_day: i64, closes: &[Decimal]) -> AssetSeries {
        AssetSeries::new(
            symbol,
            closes
                .iter()
                .enumerate()
                .map(|(i, c)| PriceObservation {
                    date: day(start_day + i as i64),
                    close: *c,
                })
                .collect(),
        )
    }

    fn input(series: Vec<AssetSeries>) -> EstimationInput {
        EstimationInput {
            series,
            lookback_days: 365,
            periods_per_year: Some(252),
        }
    }

    #[test]
    fn test_two_symbol_estimate() {
        let a = series_from("AAA", 0, &[dec!(100), dec!(101), dec!(100), dec!(102)]);
        let b = series_from("BBB", 0, &[dec!(50), dec!(49), dec!(51), dec!(50)]);
        let out = estimate(&input(vec![a, b])).unwrap();
        let est = &out.result;

        assert_eq!(est.symbols, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(est.common_dates, 4);
        assert_eq!(est.periodic_returns.len(), 3);
        assert!(!est.degraded);
        assert_eq!(est.covariance_matrix[0][1], est.covariance_matrix[1][0]);
        assert!(est.covariance_matrix[0][0] > Decimal::ZERO);
        assert!(est.covariance_matrix[1][1] > Decimal::ZERO);
    }

    #[test]
    fn test_short_history_is_dropped_not_fatal() {
        let a = series_from("AAA", 0, &[dec!(100), dec!(101), dec!(103)]);
        let b = series_from("BBB", 0, &[dec!(50), dec!(51), dec!(50)]);
        let c = series_from("CCC", 2, &[dec!(10)]);
        let out = estimate(&input(vec![a, b, c])).unwrap();

        assert_eq!(out.result.symbols.len(), 2);
        assert_eq!(out.result.dropped.len(), 1);
        assert_eq!(out.result.dropped[0].symbol, "CCC");
        assert!(out.warnings.iter().any(|w| w.contains("Dropped CCC")));
    }

    #[test]
    fn test_single_symbol_is_estimation_error() {
        let a = series_from("AAA", 0, &[dec!(100), dec!(101), dec!(103)]);
        let err = estimate(&input(vec![a])).unwrap_err();
        assert!(matches!(err, EngineError::Estimation(_)));
    }

    #[test]
    fn test_zero_close_marks_degraded() {
        let a = series_from("AAA", 0, &[dec!(100), dec!(0), dec!(5), dec!(6)]);
        let b = series_from("BBB", 0, &[dec!(50), dec!(51), dec!(52), dec!(51)]);
        let out = estimate(&input(vec![a, b])).unwrap();

        assert!(out.result.degraded);
        assert_eq!(out.result.covariance_matrix[0][0], Decimal::ZERO);
        assert_eq!(out.result.covariance_matrix[0][1], Decimal::ZERO);
        assert!(out.warnings.iter().any(|w| w.starts_with("Degraded estimate")));
    }

    #[test]
    fn test_calendar_gap_is_flagged() {
        let mut a = series_from("AAA", 0, &[dec!(100), dec!(101), dec!(102)]);
        let mut b = series_from("BBB", 0, &[dec!(50), dec!(51), dec!(50)]);
        for (s, close) in [(&mut a, dec!(103)), (&mut b, dec!(52))] {
            s.observations.push(PriceObservation {
                date: day(12),
                close,
            });
        }
        let out = estimate(&input(vec![a, b])).unwrap();

        assert_eq!(out.result.common_dates, 4);
        assert!(out
            .warnings
            .iter()
            .any(|w| w == "Gap of 10 calendar days in common history after 2024-01-03"));
    }

    #[test]
    fn test_short_gap_is_not_flagged() {
        let a = series_from("AAA", 0, &[dec!(100), dec!(101), dec!(102)]);
        let b = series_from("BBB", 0, &[dec!(50), dec!(51), dec!(50)]);
        let out = estimate(&input(vec![a, b])).unwrap();
        assert!(!out.warnings.iter().any(|w| w.starts_with("Gap of")));
    }

    #[test]
    fn test_lookback_truncation_limits_history() {
        let closes: Vec<Decimal> = (0..30).map(|i| dec!(100) + Decimal::from(i)).collect();
        let a = series_from("AAA", 0, &closes);
        let b = series_from("BBB", 0, &closes);
        let mut inp = input(vec![a, b]);
        inp.lookback_days = 9;
        let out = estimate(&inp).unwrap();
        // day 20..=29 inclusive
        assert_eq!(out.result.common_dates, 10);
    }
}
