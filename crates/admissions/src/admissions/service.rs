use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    ApplicantId, ApplicantRecord, ExternalId, NewApplicant, ProgramCode, RosterKey, SnapshotDate,
};
use super::filter::{DroppedCondition, FilterSet, RawCondition};
use super::import::{self, ImportError, ImportReport, RosterImport};
use super::ranking::{Cutoff, RankingEngine, RankingError, RankingOutcome};
use super::repository::{AdmissionsRepository, CutoffRecord, RosterError, StatisticsRecord};
use super::views::{CutoffView, DateComparison, DateSummary, StatisticsView};
use crate::config::ProgramCatalog;

/// Service composing the roster store, the ranking engine and the program catalog.
pub struct AdmissionsService<R> {
    repository: Arc<R>,
    catalog: Arc<ProgramCatalog>,
    engine: RankingEngine,
    locks: PartitionLocks,
}

/// Cooperative stop signal for batch ranking, checked between keys.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reported after each key of a batch, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub key: RosterKey,
    pub processed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed * 100) / self.total) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedKey {
    pub key: RosterKey,
    pub cutoff: Cutoff,
    pub admitted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub key: RosterKey,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub ranked: Vec<RankedKey>,
    pub failed: Vec<BatchFailure>,
    /// Set when the batch stopped before processing every key.
    pub cancelled: bool,
}

/// Records matched by a caller-supplied filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub applicants: Vec<ApplicantRecord>,
    pub dropped: Vec<DroppedCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub deleted: usize,
    /// Partitions that lost rows; their stored results are now stale.
    pub affected: Vec<RosterKey>,
    pub dropped: Vec<DroppedCondition>,
}

impl DeletionReport {
    fn from_deleted(deleted: &[ApplicantRecord]) -> Self {
        let affected: BTreeSet<RosterKey> = deleted.iter().map(ApplicantRecord::key).collect();
        Self {
            deleted: deleted.len(),
            affected: affected.into_iter().collect(),
            dropped: Vec::new(),
        }
    }
}

impl<R> AdmissionsService<R>
where
    R: AdmissionsRepository + 'static,
{
    pub fn new(repository: Arc<R>, catalog: Arc<ProgramCatalog>) -> Self {
        let engine = RankingEngine::new(Arc::clone(&catalog));
        Self {
            repository,
            catalog,
            engine,
            locks: PartitionLocks::default(),
        }
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Replace a partition with parsed roster rows.
    pub fn import_roster(
        &self,
        key: &RosterKey,
        roster: RosterImport,
    ) -> Result<ImportReport, AdmissionsServiceError> {
        let RosterImport {
            applicants,
            skipped,
        } = roster;

        let write = self
            .locks
            .exclusive(key, || self.repository.replace_partition(key, applicants))?;

        for row in &skipped {
            warn!(%key, line = row.line, reason = %row.reason, "roster row skipped");
        }
        info!(
            %key,
            imported = write.written,
            duplicates = write.replaced,
            skipped = skipped.len(),
            version = write.version,
            "roster partition imported"
        );

        Ok(ImportReport {
            key: key.clone(),
            imported: write.written,
            duplicates: write.replaced,
            skipped,
        })
    }

    /// Import a roster file. Without an explicit program the file name supplies it.
    pub fn import_file<P: AsRef<Path>>(
        &self,
        path: P,
        snapshot_date: &SnapshotDate,
        program: Option<&ProgramCode>,
    ) -> Result<ImportReport, AdmissionsServiceError> {
        let path = path.as_ref();
        let program = match program {
            Some(program) => program.clone(),
            None => import::program_from_file_name(path)?,
        };
        let key = RosterKey {
            program,
            snapshot_date: snapshot_date.clone(),
        };

        let roster = import::read_roster_file(path)?;
        self.import_roster(&key, roster)
    }

    pub fn upsert_applicant(
        &self,
        key: &RosterKey,
        applicant: NewApplicant,
    ) -> Result<ApplicantRecord, AdmissionsServiceError> {
        let record = self
            .locks
            .exclusive(key, || self.repository.upsert(key, applicant))?;
        debug!(%key, external_id = %record.external_id, "applicant upserted");
        Ok(record)
    }

    /// Rank one partition and persist its cutoff and statistics, overwriting earlier results.
    pub fn rank(&self, key: &RosterKey) -> Result<RankingOutcome, AdmissionsServiceError> {
        self.locks.exclusive(key, || -> Result<RankingOutcome, AdmissionsServiceError> {
            let snapshot = self.repository.partition(key)?;
            let outcome = self.engine.rank(key, &snapshot.records)?;
            let computed_at = Utc::now();

            self.repository.store_results(
                CutoffRecord {
                    key: key.clone(),
                    cutoff: outcome.cutoff,
                    places: outcome.places,
                    admitted: outcome.admitted.len(),
                    roster_version: snapshot.version,
                    computed_at,
                },
                StatisticsRecord {
                    key: key.clone(),
                    statistics: outcome.statistics,
                    roster_version: snapshot.version,
                    computed_at,
                },
            )?;

            info!(
                %key,
                cutoff = %outcome.cutoff,
                admitted = outcome.admitted.len(),
                places = outcome.places,
                "partition ranked"
            );
            Ok(outcome)
        })
    }

    /// Rank keys one after another. A failing key is recorded and the batch moves on.
    pub fn rank_batch<F>(
        &self,
        keys: &[RosterKey],
        cancellation: &CancellationFlag,
        mut progress: F,
    ) -> BatchReport
    where
        F: FnMut(&BatchProgress),
    {
        let mut report = BatchReport::default();
        let total = keys.len();

        for (index, key) in keys.iter().enumerate() {
            if cancellation.is_cancelled() {
                warn!(processed = index, total, "batch ranking cancelled");
                report.cancelled = true;
                break;
            }

            match self.rank(key) {
                Ok(outcome) => report.ranked.push(RankedKey {
                    key: key.clone(),
                    cutoff: outcome.cutoff,
                    admitted: outcome.admitted.len(),
                }),
                Err(error) => {
                    warn!(%key, %error, "ranking failed; continuing batch");
                    report.failed.push(BatchFailure {
                        key: key.clone(),
                        error: error.to_string(),
                    });
                }
            }

            progress(&BatchProgress {
                key: key.clone(),
                processed: index + 1,
                total,
            });
        }

        info!(
            ranked = report.ranked.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "batch ranking finished"
        );
        report
    }

    /// Every configured program on one date, plus any partition of that date holding rows
    /// under a program the catalog does not know; those fail per key.
    pub fn rank_date<F>(
        &self,
        snapshot_date: &SnapshotDate,
        cancellation: &CancellationFlag,
        progress: F,
    ) -> Result<BatchReport, AdmissionsServiceError>
    where
        F: FnMut(&BatchProgress),
    {
        let stored = self.repository.keys()?;
        let keys = self.batch_keys_for_date(snapshot_date, &stored);
        Ok(self.rank_batch(&keys, cancellation, progress))
    }

    /// Every date present in the roster, date-major, with the same key selection as `rank_date`.
    pub fn rank_all<F>(
        &self,
        cancellation: &CancellationFlag,
        progress: F,
    ) -> Result<BatchReport, AdmissionsServiceError>
    where
        F: FnMut(&BatchProgress),
    {
        let stored = self.repository.keys()?;
        let dates: BTreeSet<&SnapshotDate> = stored.iter().map(|key| &key.snapshot_date).collect();
        let keys: Vec<RosterKey> = dates
            .into_iter()
            .flat_map(|date| self.batch_keys_for_date(date, &stored))
            .collect();
        Ok(self.rank_batch(&keys, cancellation, progress))
    }

    /// Keys whose stored results were computed from an older version of the partition.
    pub fn stale_keys(&self) -> Result<Vec<RosterKey>, AdmissionsServiceError> {
        let mut stale = Vec::new();
        for record in self.repository.cutoffs()? {
            if self.repository.version(&record.key)? != record.roster_version {
                stale.push(record.key);
            }
        }
        Ok(stale)
    }

    pub fn recompute_stale<F>(
        &self,
        cancellation: &CancellationFlag,
        progress: F,
    ) -> Result<BatchReport, AdmissionsServiceError>
    where
        F: FnMut(&BatchProgress),
    {
        let keys = self.stale_keys()?;
        info!(stale = keys.len(), "recomputing stale results");
        Ok(self.rank_batch(&keys, cancellation, progress))
    }

    /// Filter the whole roster, or one partition when `scope` is given.
    pub fn query(
        &self,
        scope: Option<&RosterKey>,
        conditions: &[RawCondition],
    ) -> Result<QueryResult, AdmissionsServiceError> {
        let (filters, dropped) = FilterSet::parse(conditions);
        let records = match scope {
            Some(key) => self.repository.partition(key)?.records,
            None => self.repository.all()?,
        };

        let applicants = filters.apply(&records).into_iter().cloned().collect();
        Ok(QueryResult {
            applicants,
            dropped,
        })
    }

    /// Admitted applicants of a partition against its current roster, without persisting.
    pub fn admitted(&self, key: &RosterKey) -> Result<RankingOutcome, AdmissionsServiceError> {
        let snapshot = self.repository.partition(key)?;
        Ok(self.engine.rank(key, &snapshot.records)?)
    }

    /// Cutoff of every configured program on `snapshot_date`.
    pub fn cutoffs_for_date(
        &self,
        snapshot_date: &SnapshotDate,
    ) -> Result<Vec<CutoffView>, AdmissionsServiceError> {
        self.keys_for_date(snapshot_date)
            .iter()
            .map(|key| -> Result<CutoffView, AdmissionsServiceError> {
                let record = self.repository.cutoff(key)?;
                let version = self.repository.version(key)?;
                Ok(CutoffView::new(
                    key,
                    self.catalog.places(&key.program),
                    record.as_ref(),
                    version,
                ))
            })
            .collect()
    }

    /// Every stored cutoff, ordered by date then program.
    pub fn all_cutoffs(&self) -> Result<Vec<CutoffView>, AdmissionsServiceError> {
        let mut records = self.repository.cutoffs()?;
        records.sort_by(|left, right| {
            left.key
                .snapshot_date
                .cmp(&right.key.snapshot_date)
                .then_with(|| left.key.program.cmp(&right.key.program))
        });

        records
            .iter()
            .map(|record| -> Result<CutoffView, AdmissionsServiceError> {
                let version = self.repository.version(&record.key)?;
                Ok(CutoffView::new(
                    &record.key,
                    self.catalog.places(&record.key.program),
                    Some(record),
                    version,
                ))
            })
            .collect()
    }

    pub fn statistics_for_date(
        &self,
        snapshot_date: &SnapshotDate,
    ) -> Result<Vec<StatisticsView>, AdmissionsServiceError> {
        let stored: HashMap<RosterKey, StatisticsRecord> = self
            .repository
            .statistics()?
            .into_iter()
            .filter(|record| &record.key.snapshot_date == snapshot_date)
            .map(|record| (record.key.clone(), record))
            .collect();

        self.keys_for_date(snapshot_date)
            .iter()
            .map(|key| -> Result<StatisticsView, AdmissionsServiceError> {
                let version = self.repository.version(key)?;
                Ok(StatisticsView::new(key, stored.get(key), version))
            })
            .collect()
    }

    /// Distinct snapshot dates present in the roster.
    pub fn dates(&self) -> Result<Vec<SnapshotDate>, AdmissionsServiceError> {
        let dates: BTreeSet<SnapshotDate> = self
            .repository
            .keys()?
            .into_iter()
            .map(|key| key.snapshot_date)
            .collect();
        Ok(dates.into_iter().collect())
    }

    pub fn count(
        &self,
        program: Option<&ProgramCode>,
        snapshot_date: Option<&SnapshotDate>,
    ) -> Result<usize, AdmissionsServiceError> {
        let count = self
            .repository
            .all()?
            .iter()
            .filter(|record| program.map_or(true, |program| &record.program == program))
            .filter(|record| snapshot_date.map_or(true, |date| &record.snapshot_date == date))
            .count();
        Ok(count)
    }

    pub fn compare_dates(
        &self,
        first: &SnapshotDate,
        second: &SnapshotDate,
    ) -> Result<DateComparison, AdmissionsServiceError> {
        let records = self.repository.all()?;
        Ok(DateComparison::new(
            summarize(&records, first),
            summarize(&records, second),
        ))
    }

    pub fn delete_by_id(&self, id: ApplicantId) -> Result<ApplicantRecord, AdmissionsServiceError> {
        let deleted = self.repository.delete_where(&|record| record.id == id)?;
        let record = deleted.into_iter().next().ok_or(RosterError::NotFound)?;
        info!(%id, key = %record.key(), "applicant deleted");
        Ok(record)
    }

    /// Delete one external id, optionally narrowed to a program and/or date.
    pub fn delete_by_external_id(
        &self,
        external_id: ExternalId,
        program: Option<&ProgramCode>,
        snapshot_date: Option<&SnapshotDate>,
    ) -> Result<DeletionReport, AdmissionsServiceError> {
        let deleted = self.repository.delete_where(&|record| {
            record.external_id == external_id
                && program.map_or(true, |program| &record.program == program)
                && snapshot_date.map_or(true, |date| &record.snapshot_date == date)
        })?;
        info!(%external_id, deleted = deleted.len(), "applicants deleted by external id");
        Ok(DeletionReport::from_deleted(&deleted))
    }

    /// Delete every record the conditions match. Refuses when no condition survives parsing.
    pub fn delete_by_filters(
        &self,
        conditions: &[RawCondition],
    ) -> Result<DeletionReport, AdmissionsServiceError> {
        let (filters, dropped) = FilterSet::parse(conditions);
        if filters.is_empty() {
            return Err(AdmissionsServiceError::EmptyDeletionFilter);
        }

        let deleted = self
            .repository
            .delete_where(&|record| filters.matches(record))?;
        info!(
            deleted = deleted.len(),
            dropped = dropped.len(),
            "applicants deleted by filter"
        );

        let mut report = DeletionReport::from_deleted(&deleted);
        report.dropped = dropped;
        Ok(report)
    }

    /// Drop a partition along with its cutoff and statistics.
    pub fn delete_partition(&self, key: &RosterKey) -> Result<usize, AdmissionsServiceError> {
        let removed = self
            .locks
            .exclusive(key, || self.repository.delete_partition(key))?;
        info!(%key, removed, "roster partition deleted");
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), AdmissionsServiceError> {
        self.repository.clear()?;
        warn!("roster and all results cleared");
        Ok(())
    }

    /// Catalog keys in catalog order, then stored keys of the date outside the catalog.
    fn batch_keys_for_date(
        &self,
        snapshot_date: &SnapshotDate,
        stored: &[RosterKey],
    ) -> Vec<RosterKey> {
        let mut keys = self.keys_for_date(snapshot_date);
        let unconfigured: Vec<RosterKey> = stored
            .iter()
            .filter(|key| &key.snapshot_date == snapshot_date && !keys.contains(key))
            .cloned()
            .collect();
        for key in &unconfigured {
            warn!(%key, "partition holds rows for a program missing from the catalog");
        }
        keys.extend(unconfigured);
        keys
    }

    fn keys_for_date(&self, snapshot_date: &SnapshotDate) -> Vec<RosterKey> {
        self.catalog
            .codes()
            .map(|program| RosterKey {
                program: program.clone(),
                snapshot_date: snapshot_date.clone(),
            })
            .collect()
    }
}

fn summarize(records: &[ApplicantRecord], snapshot_date: &SnapshotDate) -> DateSummary {
    let scores: Vec<u32> = records
        .iter()
        .filter(|record| &record.snapshot_date == snapshot_date)
        .map(|record| record.total_score)
        .collect();
    let mean_total_score = if scores.is_empty() {
        None
    } else {
        let sum: u64 = scores.iter().map(|score| u64::from(*score)).sum();
        Some(sum as f64 / scores.len() as f64)
    };

    DateSummary {
        snapshot_date: snapshot_date.clone(),
        applicants: scores.len(),
        mean_total_score,
    }
}

/// One mutex per partition so imports, rankings and deletions of a key never interleave.
#[derive(Debug, Default)]
struct PartitionLocks {
    locks: Mutex<HashMap<RosterKey, Arc<Mutex<()>>>>,
}

impl PartitionLocks {
    fn exclusive<T>(&self, key: &RosterKey, operation: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        operation()
    }
}

/// Error raised by the admissions service.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionsServiceError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("deletion by filter needs at least one usable condition")]
    EmptyDeletionFilter,
}
