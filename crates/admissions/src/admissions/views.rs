use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{ProgramCode, RosterKey, SnapshotDate};
use super::ranking::Cutoff;
use super::repository::{CutoffRecord, StatisticsRecord};
use super::statistics::PriorityStatistics;

/// Freshness of a stored result relative to the live roster partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Current,
    /// The partition changed after the result was computed.
    Stale,
    NotComputed,
}

impl ResultStatus {
    fn of(roster_version: Option<u64>, live_version: u64) -> Self {
        match roster_version {
            None => ResultStatus::NotComputed,
            Some(version) if version == live_version => ResultStatus::Current,
            Some(_) => ResultStatus::Stale,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResultStatus::Current => "current",
            ResultStatus::Stale => "stale",
            ResultStatus::NotComputed => "not computed",
        }
    }
}

/// Presentation row for one program's cutoff on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoffView {
    pub program: ProgramCode,
    pub snapshot_date: SnapshotDate,
    pub places: Option<usize>,
    pub cutoff: Option<Cutoff>,
    /// Score, `undersubscribed` or `-` when nothing was computed.
    pub label: String,
    pub admitted: Option<usize>,
    pub status: ResultStatus,
    pub computed_at: Option<DateTime<Utc>>,
}

impl CutoffView {
    pub(crate) fn new(
        key: &RosterKey,
        places: Option<usize>,
        record: Option<&CutoffRecord>,
        live_version: u64,
    ) -> Self {
        Self {
            program: key.program.clone(),
            snapshot_date: key.snapshot_date.clone(),
            places: places.or_else(|| record.map(|record| record.places)),
            cutoff: record.map(|record| record.cutoff),
            label: record
                .map(|record| record.cutoff.label())
                .unwrap_or_else(|| "-".to_string()),
            admitted: record.map(|record| record.admitted),
            status: ResultStatus::of(record.map(|record| record.roster_version), live_version),
            computed_at: record.map(|record| record.computed_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsView {
    pub program: ProgramCode,
    pub snapshot_date: SnapshotDate,
    pub statistics: Option<PriorityStatistics>,
    pub status: ResultStatus,
}

impl StatisticsView {
    pub(crate) fn new(key: &RosterKey, record: Option<&StatisticsRecord>, live_version: u64) -> Self {
        Self {
            program: key.program.clone(),
            snapshot_date: key.snapshot_date.clone(),
            statistics: record.map(|record| record.statistics),
            status: ResultStatus::of(record.map(|record| record.roster_version), live_version),
        }
    }
}

/// Roster size and mean total score of one snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateSummary {
    pub snapshot_date: SnapshotDate,
    pub applicants: usize,
    pub mean_total_score: Option<f64>,
}

/// Side-by-side view of two snapshot dates; deltas are `second - first`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateComparison {
    pub first: DateSummary,
    pub second: DateSummary,
    pub applicant_delta: i64,
    pub mean_total_score_delta: Option<f64>,
}

impl DateComparison {
    pub(crate) fn new(first: DateSummary, second: DateSummary) -> Self {
        let applicant_delta = second.applicants as i64 - first.applicants as i64;
        let mean_total_score_delta = match (first.mean_total_score, second.mean_total_score) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };

        Self {
            first,
            second,
            applicant_delta,
            mean_total_score_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_roster_version() {
        assert_eq!(ResultStatus::of(None, 3), ResultStatus::NotComputed);
        assert_eq!(ResultStatus::of(Some(3), 3), ResultStatus::Current);
        assert_eq!(ResultStatus::of(Some(2), 3), ResultStatus::Stale);
    }

    #[test]
    fn view_without_record_reads_as_dash() {
        let view = CutoffView::new(&RosterKey::new("IB", "01.08"), Some(20), None, 0);
        assert_eq!(view.label, "-");
        assert_eq!(view.places, Some(20));
        assert_eq!(view.status, ResultStatus::NotComputed);
    }

    #[test]
    fn comparison_deltas_run_from_first_to_second() {
        let comparison = DateComparison::new(
            DateSummary {
                snapshot_date: SnapshotDate::new("01.08"),
                applicants: 10,
                mean_total_score: Some(200.0),
            },
            DateSummary {
                snapshot_date: SnapshotDate::new("02.08"),
                applicants: 7,
                mean_total_score: Some(212.5),
            },
        );

        assert_eq!(comparison.applicant_delta, -3);
        assert_eq!(comparison.mean_total_score_delta, Some(12.5));
    }
}
