//! Statistics accumulation over decoded class records.
//!
//! The aggregator sees each record exactly once, in arrival order, and only
//! hands out a [`SummaryStats`] after the whole sequence has been consumed.

use crate::error::SpinsheetError;
use crate::output::{Extremes, SummaryStats, Totals};
use crate::record::ClassRecord;

/// Accumulates per-category counts, totals and extremes.
#[derive(Debug, Default)]
pub struct Aggregator {
    stats: SummaryStats,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the running statistics.
    ///
    /// # Errors
    /// [`SpinsheetError::TotalOverflow`] when a sum no longer fits in an
    /// `i64`. The statistics are left as they were before the call.
    pub fn push(&mut self, record: &ClassRecord) -> Result<(), SpinsheetError> {
        let totals = self.next_totals(record)?;
        let s = &mut self.stats;

        *s.studio_counts.entry(record.classroom.clone()).or_insert(0) += 1;
        *s.instructor_counts
            .entry(record.instructor.clone())
            .or_insert(0) += 1;
        s.totals = totals;

        track_max(&mut s.maxima, record);
        track_min(&mut s.minima, record);
        Ok(())
    }

    fn next_totals(&self, record: &ClassRecord) -> Result<Totals, SpinsheetError> {
        let t = &self.stats.totals;
        let records = t.class_count + 1;
        let add = |column: &'static str, total: i64, value: i64| {
            total
                .checked_add(value)
                .ok_or(SpinsheetError::TotalOverflow { column, records })
        };
        Ok(Totals {
            class_count: records,
            power: add("power", t.power, record.total_power)?,
            distance: add("distance", t.distance, record.total_distance)?,
            calories_low: add("calories low", t.calories_low, record.estimated_calories_low)?,
            calories_high: add(
                "calories high",
                t.calories_high,
                record.estimated_calories_high,
            )?,
        })
    }

    /// Number of records folded in so far.
    pub fn count(&self) -> u64 {
        self.stats.totals.class_count
    }

    /// Finish aggregation.
    pub fn finish(self) -> SummaryStats {
        self.stats
    }
}

fn track_max(maxima: &mut Extremes, record: &ClassRecord) {
    replace_if(&mut maxima.power, record.total_power, |new, old| new > old);
    replace_if(&mut maxima.distance, record.total_distance, |new, old| {
        new > old
    });
}

fn track_min(minima: &mut Extremes, record: &ClassRecord) {
    replace_if(&mut minima.power, record.total_power, |new, old| new < old);
    replace_if(&mut minima.distance, record.total_distance, |new, old| {
        new < old
    });
}

/// Seed an unset slot, otherwise replace when `better(new, current)`.
fn replace_if(slot: &mut Option<i64>, value: i64, better: impl Fn(i64, i64) -> bool) {
    match *slot {
        None => *slot = Some(value),
        Some(current) if better(value, current) => *slot = Some(value),
        Some(_) => {}
    }
}

/// Aggregate a finished slice of records.
pub fn summarise<'a>(
    records: impl IntoIterator<Item = &'a ClassRecord>,
) -> Result<SummaryStats, SpinsheetError> {
    let mut agg = Aggregator::new();
    for r in records {
        agg.push(r)?;
    }
    Ok(agg.finish())
}
