//! Output types: aggregated statistics and the composite report handed to
//! the renderer.

use crate::record::ClassRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running sums across every decoded record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Number of records seen.
    pub class_count: u64,
    pub power: i64,
    pub distance: i64,
    pub calories_low: i64,
    pub calories_high: i64,
}

/// Observed extreme for each tracked metric. `None` until a record is seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extremes {
    pub power: Option<i64>,
    pub distance: Option<i64>,
}

/// Aggregated statistics for one uploaded sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    /// Records per classroom.
    pub studio_counts: BTreeMap<String, u64>,
    /// Records per instructor.
    pub instructor_counts: BTreeMap<String, u64>,
    pub totals: Totals,
    pub maxima: Extremes,
    pub minima: Extremes,
}

/// Everything the presentation template can show.
///
/// Field names follow the JSON keys the page template historically used
/// (`studioCounts`, `totalCount`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub records: Vec<ClassRecord>,
    pub studio_counts: BTreeMap<String, u64>,
    pub instructor_counts: BTreeMap<String, u64>,
    pub total_count: usize,
    pub totals: Totals,
    pub maxima: Extremes,
    pub minima: Extremes,
}

impl ClassReport {
    /// Combine the decoded records with their statistics.
    pub fn new(records: Vec<ClassRecord>, stats: SummaryStats) -> Self {
        Self {
            total_count: records.len(),
            records,
            studio_counts: stats.studio_counts,
            instructor_counts: stats.instructor_counts,
            totals: stats.totals,
            maxima: stats.maxima,
            minima: stats.minima,
        }
    }
}
