//! Applicant roster, sequential-fold filtering and priority-bucket cutoff ranking.
//!
//! Rosters are partitioned by program and snapshot date. Ranking reads one partition,
//! admits consenting applicants bucket by bucket and records the cutoff score together
//! with the partition version it was computed from.

pub mod domain;
pub mod filter;
pub mod import;
pub mod ranking;
pub mod repository;
pub mod router;
pub mod service;
pub mod statistics;
pub mod views;

#[cfg(test)]
mod tests;

pub use domain::{
    ApplicantId, ApplicantRecord, ExternalId, NewApplicant, Priority, PriorityOutOfRange,
    ProgramCode, RosterKey, SnapshotDate, SubjectScores,
};
pub use filter::{
    Combinator, ComparisonOperator, ConditionError, DroppedCondition, FilterCondition,
    FilterField, FilterSet, RawCondition, Scalar,
};
pub use import::{
    program_from_file_name, read_roster, read_roster_file, ImportError, ImportReport,
    RosterImport, SkippedRow,
};
pub use ranking::{Cutoff, RankingEngine, RankingError, RankingOutcome};
pub use repository::{
    AdmissionsRepository, CutoffRecord, MemoryRepository, PartitionSnapshot, PartitionWrite,
    RosterError, StatisticsRecord,
};
pub use router::admissions_router;
pub use service::{
    AdmissionsService, AdmissionsServiceError, BatchFailure, BatchProgress, BatchReport,
    CancellationFlag, DeletionReport, QueryResult, RankedKey,
};
pub use statistics::{PriorityCounts, PriorityStatistics};
pub use views::{CutoffView, DateComparison, DateSummary, ResultStatus, StatisticsView};
