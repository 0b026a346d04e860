use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::types::{AssetSeries, PriceObservation};
use crate::EngineResult;

/// A sample covariance needs at least two return observations.
pub const MIN_COMMON_DATES: usize = 3;

/// Check collaborator data: unique symbols, strictly increasing dates,
/// non-negative closes.
pub fn validate_series(series: &[AssetSeries]) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for s in series {
        if !seen.insert(s.symbol.as_str()) {
            return Err(EngineError::collaborator(
                "price_history",
                format!("duplicate series for symbol {}", s.symbol),
            ));
        }
        for pair in s.observations.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(EngineError::collaborator(
                    "price_history",
                    format!(
                        "{}: dates not strictly increasing ({} then {})",
                        s.symbol, pair[0].date, pair[1].date
                    ),
                ));
            }
        }
        if let Some(bad) = s.observations.iter().find(|o| o.close < Decimal::ZERO) {
            return Err(EngineError::collaborator(
                "price_history",
                format!("{}: negative close {} on {}", s.symbol, bad.close, bad.date),
            ));
        }
    }
    Ok(())
}

/// Keep observations on or after `as_of - lookback_days`.
pub fn truncate(series: &AssetSeries, as_of: NaiveDate, lookback_days: u32) -> AssetSeries {
    let cutoff = as_of - Duration::days(i64::from(lookback_days));
    let observations: Vec<PriceObservation> = series
        .observations
        .iter()
        .filter(|o| o.date >= cutoff)
        .cloned()
        .collect();
    AssetSeries::new(series.symbol.clone(), observations)
}

fn date_set(series: &AssetSeries) -> BTreeSet<NaiveDate> {
    series.observations.iter().map(|o| o.date).collect()
}

fn intersect(sets: &[&BTreeSet<NaiveDate>]) -> BTreeSet<NaiveDate> {
    let mut iter = sets.iter();
    let first = match iter.next() {
        Some(s) => (*s).clone(),
        None => return BTreeSet::new(),
    };
    iter.fold(first, |acc, s| acc.intersection(s).copied().collect())
}

/// Outcome of restricting the universe to a common date set.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Indices into the input slice of the retained series.
    pub retained: Vec<usize>,
    pub dropped: Vec<usize>,
    pub common_dates: Vec<NaiveDate>,
}

/// Find the common dates of all series, dropping the series whose removal
/// enlarges the intersection most while it is too small to estimate from.
pub fn align(series: &[AssetSeries]) -> Alignment {
    let sets: Vec<BTreeSet<NaiveDate>> = series.iter().map(date_set).collect();
    let mut retained: Vec<usize> = (0..series.len()).collect();
    let mut dropped = Vec::new();

    loop {
        let current: Vec<&BTreeSet<NaiveDate>> = retained.iter().map(|&i| &sets[i]).collect();
        let common = intersect(&current);
        if common.len() >= MIN_COMMON_DATES || retained.len() <= 2 {
            return Alignment {
                retained,
                dropped,
                common_dates: common.into_iter().collect(),
            };
        }

        // (position in retained, intersection size without it)
        let mut best: Option<(usize, usize)> = None;
        for pos in 0..retained.len() {
            let others: Vec<&BTreeSet<NaiveDate>> = retained
                .iter()
                .enumerate()
                .filter(|(p, _)| *p != pos)
                .map(|(_, &i)| &sets[i])
                .collect();
            let size = intersect(&others).len();
            let better = match best {
                None => true,
                Some((best_pos, best_size)) => {
                    size > best_size
                        || (size == best_size
                            && sets[retained[pos]].len() < sets[retained[best_pos]].len())
                }
            };
            if better {
                best = Some((pos, size));
            }
        }

        match best {
            Some((pos, size)) if size > common.len() => {
                dropped.push(retained.remove(pos));
            }
            _ => {
                return Alignment {
                    retained,
                    dropped,
                    common_dates: common.into_iter().collect(),
                };
            }
        }
    }
}

/// Closes of `series` on each of `dates`, which must all be present.
pub fn closes_on(series: &AssetSeries, dates: &[NaiveDate]) -> Vec<Decimal> {
    let mut out = Vec::with_capacity(dates.len());
    let mut obs = series.observations.iter().peekable();
    for d in dates {
        while let Some(o) = obs.peek() {
            if o.date < *d {
                obs.next();
            } else {
                break;
            }
        }
        if let Some(o) = obs.peek() {
            if o.date == *d {
                out.push(o.close);
            }
        }
    }
    out
}

/// Simple returns between consecutive closes. `None` marks a return that is
/// not finite (previous close of zero).
pub fn simple_returns(closes: &[Decimal]) -> Vec<Option<Decimal>> {
    closes
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).checked_div(pair[0]))
        .collect()
}

/// Largest calendar gap between consecutive dates, with the gap start.
pub fn largest_gap(dates: &[NaiveDate]) -> Option<(NaiveDate, i64)> {
    dates
        .windows(2)
        .map(|pair| (pair[0], (pair[1] - pair[0]).num_days()))
        .max_by_key(|(_, days)| *days)
}
