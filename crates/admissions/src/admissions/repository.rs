use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{ApplicantId, ApplicantRecord, ExternalId, NewApplicant, RosterKey};
use super::ranking::Cutoff;
use super::statistics::PriorityStatistics;

/// Persisted cutoff for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffRecord {
    pub key: RosterKey,
    pub cutoff: Cutoff,
    pub places: usize,
    pub admitted: usize,
    /// Partition version the ranking read; a mismatch with the live version means stale.
    pub roster_version: u64,
    pub computed_at: DateTime<Utc>,
}

/// Persisted per-priority counts for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub key: RosterKey,
    #[serde(flatten)]
    pub statistics: PriorityStatistics,
    pub roster_version: u64,
    pub computed_at: DateTime<Utc>,
}

/// Rows of one partition as read at `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub key: RosterKey,
    pub version: u64,
    pub records: Vec<ApplicantRecord>,
}

/// Outcome of replacing a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionWrite {
    pub key: RosterKey,
    pub version: u64,
    pub written: usize,
    /// Rows that overwrote an earlier row with the same external id in the same batch.
    pub replaced: usize,
}

/// Storage abstraction for the roster and the ranking results derived from it.
///
/// Every mutation of a partition bumps its version, so cutoff and statistics records
/// computed before a deletion or re-import can be recognised as stale.
pub trait AdmissionsRepository: Send + Sync {
    /// Replace every row of `key`. Later entries win over earlier ones with the same external id.
    fn replace_partition(
        &self,
        key: &RosterKey,
        applicants: Vec<NewApplicant>,
    ) -> Result<PartitionWrite, RosterError>;
    fn upsert(&self, key: &RosterKey, applicant: NewApplicant)
        -> Result<ApplicantRecord, RosterError>;
    fn partition(&self, key: &RosterKey) -> Result<PartitionSnapshot, RosterError>;
    fn all(&self) -> Result<Vec<ApplicantRecord>, RosterError>;
    /// Keys of partitions that currently hold at least one row.
    fn keys(&self) -> Result<Vec<RosterKey>, RosterError>;
    fn version(&self, key: &RosterKey) -> Result<u64, RosterError>;
    fn delete_where(
        &self,
        predicate: &dyn Fn(&ApplicantRecord) -> bool,
    ) -> Result<Vec<ApplicantRecord>, RosterError>;
    /// Drop a partition together with its cutoff and statistics.
    fn delete_partition(&self, key: &RosterKey) -> Result<usize, RosterError>;
    fn clear(&self) -> Result<(), RosterError>;
    fn store_results(
        &self,
        cutoff: CutoffRecord,
        statistics: StatisticsRecord,
    ) -> Result<(), RosterError>;
    fn cutoff(&self, key: &RosterKey) -> Result<Option<CutoffRecord>, RosterError>;
    fn cutoffs(&self) -> Result<Vec<CutoffRecord>, RosterError>;
    fn statistics(&self) -> Result<Vec<StatisticsRecord>, RosterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("record not found")]
    NotFound,
    #[error("roster integrity violated: {0}")]
    Integrity(String),
    #[error("roster store unavailable: {0}")]
    Unavailable(String),
    #[error("roster snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster snapshot is malformed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Partition {
    version: u64,
    rows: BTreeMap<ExternalId, ApplicantRecord>,
}

#[derive(Debug, Default)]
struct RosterState {
    last_id: u64,
    partitions: BTreeMap<RosterKey, Partition>,
    cutoffs: BTreeMap<RosterKey, CutoffRecord>,
    statistics: BTreeMap<RosterKey, StatisticsRecord>,
}

impl RosterState {
    fn next_id(&mut self) -> ApplicantId {
        self.last_id += 1;
        ApplicantId(self.last_id)
    }
}

/// Mutex-guarded roster that can be saved to and restored from a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<RosterState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a roster from `path`; a missing file yields an empty roster.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RosterError> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => {
                let repository = Self::from_reader(BufReader::new(file))?;
                info!(path = %path.display(), "roster snapshot loaded");
                Ok(repository)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no roster snapshot yet; starting empty");
                Ok(Self::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RosterError> {
        let snapshot: RosterSnapshot = serde_json::from_reader(reader)?;
        let state = snapshot.into_state()?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Write the roster to `path` through a sibling temp file so readers never see half a snapshot.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RosterError> {
        let path = path.as_ref();
        let staging = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            self.to_writer(&mut writer)?;
            writer.flush()?;
        }
        std::fs::rename(&staging, path)?;
        debug!(path = %path.display(), "roster snapshot saved");
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), RosterError> {
        let snapshot = RosterSnapshot::from_state(&*self.lock()?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RosterState>, RosterError> {
        self.state
            .lock()
            .map_err(|_| RosterError::Unavailable("roster lock poisoned".to_string()))
    }
}

impl AdmissionsRepository for MemoryRepository {
    fn replace_partition(
        &self,
        key: &RosterKey,
        applicants: Vec<NewApplicant>,
    ) -> Result<PartitionWrite, RosterError> {
        let mut state = self.lock()?;
        let mut rows: BTreeMap<ExternalId, ApplicantRecord> = BTreeMap::new();
        let mut replaced = 0;

        for applicant in applicants {
            let id = match rows.get(&applicant.external_id) {
                Some(existing) => {
                    replaced += 1;
                    existing.id
                }
                None => state.next_id(),
            };
            rows.insert(
                applicant.external_id,
                ApplicantRecord::from_new(id, key, applicant),
            );
        }

        let partition = state.partitions.entry(key.clone()).or_default();
        partition.version += 1;
        partition.rows = rows;

        Ok(PartitionWrite {
            key: key.clone(),
            version: partition.version,
            written: partition.rows.len(),
            replaced,
        })
    }

    fn upsert(
        &self,
        key: &RosterKey,
        applicant: NewApplicant,
    ) -> Result<ApplicantRecord, RosterError> {
        let mut state = self.lock()?;
        let existing = state
            .partitions
            .get(key)
            .and_then(|partition| partition.rows.get(&applicant.external_id))
            .map(|record| record.id);
        let id = match existing {
            Some(id) => id,
            None => state.next_id(),
        };

        let record = ApplicantRecord::from_new(id, key, applicant);
        let partition = state.partitions.entry(key.clone()).or_default();
        partition.version += 1;
        partition.rows.insert(record.external_id, record.clone());
        Ok(record)
    }

    fn partition(&self, key: &RosterKey) -> Result<PartitionSnapshot, RosterError> {
        let state = self.lock()?;
        let (version, records) = match state.partitions.get(key) {
            Some(partition) => (
                partition.version,
                partition.rows.values().cloned().collect(),
            ),
            None => (0, Vec::new()),
        };

        Ok(PartitionSnapshot {
            key: key.clone(),
            version,
            records,
        })
    }

    fn all(&self) -> Result<Vec<ApplicantRecord>, RosterError> {
        let state = self.lock()?;
        Ok(state
            .partitions
            .values()
            .flat_map(|partition| partition.rows.values().cloned())
            .collect())
    }

    fn keys(&self) -> Result<Vec<RosterKey>, RosterError> {
        let state = self.lock()?;
        Ok(state
            .partitions
            .iter()
            .filter(|(_, partition)| !partition.rows.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn version(&self, key: &RosterKey) -> Result<u64, RosterError> {
        let state = self.lock()?;
        Ok(state
            .partitions
            .get(key)
            .map(|partition| partition.version)
            .unwrap_or(0))
    }

    fn delete_where(
        &self,
        predicate: &dyn Fn(&ApplicantRecord) -> bool,
    ) -> Result<Vec<ApplicantRecord>, RosterError> {
        let mut state = self.lock()?;
        let mut deleted = Vec::new();

        for partition in state.partitions.values_mut() {
            let before = deleted.len();
            partition.rows.retain(|_, record| {
                if predicate(record) {
                    deleted.push(record.clone());
                    false
                } else {
                    true
                }
            });
            if deleted.len() > before {
                partition.version += 1;
            }
        }

        Ok(deleted)
    }

    fn delete_partition(&self, key: &RosterKey) -> Result<usize, RosterError> {
        let mut state = self.lock()?;
        let removed = match state.partitions.get_mut(key) {
            Some(partition) => {
                let removed = partition.rows.len();
                partition.rows.clear();
                partition.version += 1;
                removed
            }
            None => 0,
        };
        state.cutoffs.remove(key);
        state.statistics.remove(key);
        Ok(removed)
    }

    /// Empties every partition; versions keep increasing across a clear.
    fn clear(&self) -> Result<(), RosterError> {
        let mut state = self.lock()?;
        for partition in state.partitions.values_mut() {
            partition.rows.clear();
            partition.version += 1;
        }
        state.cutoffs.clear();
        state.statistics.clear();
        Ok(())
    }

    fn store_results(
        &self,
        cutoff: CutoffRecord,
        statistics: StatisticsRecord,
    ) -> Result<(), RosterError> {
        if cutoff.key != statistics.key {
            return Err(RosterError::Integrity(format!(
                "cutoff for {} stored with statistics for {}",
                cutoff.key, statistics.key
            )));
        }

        let mut state = self.lock()?;
        state.cutoffs.insert(cutoff.key.clone(), cutoff);
        state.statistics.insert(statistics.key.clone(), statistics);
        Ok(())
    }

    fn cutoff(&self, key: &RosterKey) -> Result<Option<CutoffRecord>, RosterError> {
        let state = self.lock()?;
        Ok(state.cutoffs.get(key).cloned())
    }

    fn cutoffs(&self) -> Result<Vec<CutoffRecord>, RosterError> {
        let state = self.lock()?;
        Ok(state.cutoffs.values().cloned().collect())
    }

    fn statistics(&self) -> Result<Vec<StatisticsRecord>, RosterError> {
        let state = self.lock()?;
        Ok(state.statistics.values().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RosterSnapshot {
    last_id: u64,
    partitions: Vec<PartitionEntry>,
    #[serde(default)]
    cutoffs: Vec<CutoffRecord>,
    #[serde(default)]
    statistics: Vec<StatisticsRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionEntry {
    key: RosterKey,
    version: u64,
    applicants: Vec<ApplicantRecord>,
}

impl RosterSnapshot {
    fn from_state(state: &RosterState) -> Self {
        Self {
            last_id: state.last_id,
            partitions: state
                .partitions
                .iter()
                .map(|(key, partition)| PartitionEntry {
                    key: key.clone(),
                    version: partition.version,
                    applicants: partition.rows.values().cloned().collect(),
                })
                .collect(),
            cutoffs: state.cutoffs.values().cloned().collect(),
            statistics: state.statistics.values().cloned().collect(),
        }
    }

    fn into_state(self) -> Result<RosterState, RosterError> {
        let mut state = RosterState {
            last_id: self.last_id,
            ..RosterState::default()
        };

        for entry in self.partitions {
            let mut rows = BTreeMap::new();
            for applicant in entry.applicants {
                if !applicant.belongs_to(&entry.key) {
                    return Err(RosterError::Integrity(format!(
                        "applicant {} filed under {} belongs to {}",
                        applicant.id,
                        entry.key,
                        applicant.key()
                    )));
                }
                state.last_id = state.last_id.max(applicant.id.0);
                if let Some(previous) = rows.insert(applicant.external_id, applicant) {
                    return Err(RosterError::Integrity(format!(
                        "external id {} appears more than once in {}",
                        previous.external_id, entry.key
                    )));
                }
            }
            state.partitions.insert(
                entry.key,
                Partition {
                    version: entry.version,
                    rows,
                },
            );
        }

        for cutoff in self.cutoffs {
            state.cutoffs.insert(cutoff.key.clone(), cutoff);
        }
        for statistics in self.statistics {
            state.statistics.insert(statistics.key.clone(), statistics);
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admissions::domain::{Priority, SubjectScores};

    fn applicant(external_id: u32, total_score: u32) -> NewApplicant {
        NewApplicant {
            external_id: ExternalId(external_id),
            consent: true,
            priority: Priority::try_from(1u8).expect("valid priority"),
            scores: SubjectScores {
                physics: 70,
                russian: 70,
                math: 70,
                achievements: 5,
            },
            total_score,
        }
    }

    fn results(key: &RosterKey, version: u64) -> (CutoffRecord, StatisticsRecord) {
        let computed_at = Utc::now();
        (
            CutoffRecord {
                key: key.clone(),
                cutoff: Cutoff::Score(215),
                places: 1,
                admitted: 1,
                roster_version: version,
                computed_at,
            },
            StatisticsRecord {
                key: key.clone(),
                statistics: PriorityStatistics::default(),
                roster_version: version,
                computed_at,
            },
        )
    }

    #[test]
    fn replacing_a_partition_discards_previous_rows() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("PM", "01.08");

        repository
            .replace_partition(&key, vec![applicant(1, 200), applicant(2, 210)])
            .expect("first import");
        let write = repository
            .replace_partition(&key, vec![applicant(3, 220)])
            .expect("second import");

        assert_eq!(write.version, 2);
        let snapshot = repository.partition(&key).expect("partition readable");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].external_id, ExternalId(3));
    }

    #[test]
    fn duplicate_rows_in_one_batch_keep_the_last_values() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("PM", "01.08");

        let write = repository
            .replace_partition(&key, vec![applicant(500, 180), applicant(500, 240)])
            .expect("import succeeds");

        assert_eq!(write.written, 1);
        assert_eq!(write.replaced, 1);
        let snapshot = repository.partition(&key).expect("partition readable");
        assert_eq!(snapshot.records[0].total_score, 240);
    }

    #[test]
    fn upsert_keeps_internal_id_for_existing_triple() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("X", "D1");

        let first = repository.upsert(&key, applicant(500, 200)).expect("insert");
        let second = repository.upsert(&key, applicant(500, 230)).expect("update");

        assert_eq!(first.id, second.id);
        let snapshot = repository.partition(&key).expect("partition readable");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].total_score, 230);
    }

    #[test]
    fn deletions_bump_the_partition_version() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("IB", "02.08");
        repository
            .replace_partition(&key, vec![applicant(1, 200), applicant(2, 150)])
            .expect("import");
        let before = repository.version(&key).expect("version");

        let deleted = repository
            .delete_where(&|record| record.total_score < 180)
            .expect("delete");

        assert_eq!(deleted.len(), 1);
        assert_eq!(repository.version(&key).expect("version"), before + 1);

        let untouched = repository
            .delete_where(&|record| record.total_score > 1000)
            .expect("delete nothing");
        assert!(untouched.is_empty());
        assert_eq!(repository.version(&key).expect("version"), before + 1);
    }

    #[test]
    fn clearing_keeps_partition_versions_increasing() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("IB", "02.08");
        repository
            .replace_partition(&key, vec![applicant(1, 200)])
            .expect("import");
        let before = repository.version(&key).expect("version");

        repository.clear().expect("clear");

        assert!(repository.keys().expect("keys").is_empty());
        assert!(repository.all().expect("rows").is_empty());
        assert_eq!(repository.version(&key).expect("version"), before + 1);

        repository
            .replace_partition(&key, vec![applicant(1, 200)])
            .expect("re-import");
        assert!(repository.version(&key).expect("version") > before + 1);
    }

    #[test]
    fn deleting_a_partition_drops_its_results() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("IB", "02.08");
        repository
            .replace_partition(&key, vec![applicant(1, 200)])
            .expect("import");
        let (cutoff, statistics) = results(&key, 1);
        repository
            .store_results(cutoff, statistics)
            .expect("results stored");

        let removed = repository.delete_partition(&key).expect("delete");

        assert_eq!(removed, 1);
        assert!(repository.cutoff(&key).expect("lookup").is_none());
        assert!(repository.statistics().expect("statistics").is_empty());
        assert!(repository.keys().expect("keys").is_empty());
    }

    #[test]
    fn snapshot_round_trip_preserves_rows_versions_and_results() {
        let repository = MemoryRepository::new();
        let key = RosterKey::new("ITSS", "03.08");
        repository
            .replace_partition(&key, vec![applicant(1, 200), applicant(2, 190)])
            .expect("import");
        let (cutoff, statistics) = results(&key, 1);
        repository
            .store_results(cutoff.clone(), statistics)
            .expect("results stored");

        let mut buffer = Vec::new();
        repository.to_writer(&mut buffer).expect("snapshot written");
        let restored = MemoryRepository::from_reader(buffer.as_slice()).expect("snapshot read");

        assert_eq!(restored.all().expect("rows"), repository.all().expect("rows"));
        assert_eq!(restored.version(&key).expect("version"), 1);
        assert_eq!(restored.cutoff(&key).expect("lookup"), Some(cutoff));

        let next = restored
            .upsert(&key, applicant(3, 180))
            .expect("insert after restore");
        assert_eq!(next.id, ApplicantId(3));
    }

    #[test]
    fn snapshot_with_duplicate_triples_is_rejected() {
        let json = r#"{
            "last_id": 2,
            "partitions": [{
                "key": {"program": "PM", "snapshot_date": "01.08"},
                "version": 1,
                "applicants": [
                    {"id": 1, "external_id": 7, "program": "PM", "snapshot_date": "01.08",
                     "consent": true, "priority": 1,
                     "scores": {"physics": 1, "russian": 1, "math": 1, "achievements": 0},
                     "total_score": 3},
                    {"id": 2, "external_id": 7, "program": "PM", "snapshot_date": "01.08",
                     "consent": false, "priority": 2,
                     "scores": {"physics": 1, "russian": 1, "math": 1, "achievements": 0},
                     "total_score": 3}
                ]
            }]
        }"#;

        match MemoryRepository::from_reader(json.as_bytes()) {
            Err(RosterError::Integrity(message)) => assert!(message.contains("external id 7")),
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[test]
    fn load_of_missing_file_starts_empty() {
        let path = std::env::temp_dir().join("admissions-missing-snapshot-does-not-exist.json");
        let repository = MemoryRepository::load(&path).expect("empty roster");
        assert!(repository.all().expect("rows").is_empty());
    }
}
