use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{ApplicantRecord, ExternalId, RosterKey};
use super::filter::FilterSet;
use super::statistics::{self, PriorityStatistics};
use crate::config::ProgramCatalog;

/// Result of one ranking run for a program and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
    /// Total score of the last applicant admitted.
    Score(u32),
    /// Fewer consenting applicants than places; no cutoff exists.
    Undersubscribed,
}

impl Cutoff {
    pub fn score(self) -> Option<u32> {
        match self {
            Cutoff::Score(score) => Some(score),
            Cutoff::Undersubscribed => None,
        }
    }

    pub fn label(self) -> String {
        match self {
            Cutoff::Score(score) => score.to_string(),
            Cutoff::Undersubscribed => "undersubscribed".to_string(),
        }
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankingError {
    #[error("no seat capacity configured for the program of {key}")]
    UnknownProgram { key: RosterKey },
    #[error("applicant {external_id} appears more than once in {key}")]
    DuplicateApplicant {
        key: RosterKey,
        external_id: ExternalId,
    },
}

impl RankingError {
    pub fn key(&self) -> &RosterKey {
        match self {
            RankingError::UnknownProgram { key } | RankingError::DuplicateApplicant { key, .. } => {
                key
            }
        }
    }
}

/// Admitted set, cutoff and counts for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingOutcome {
    pub key: RosterKey,
    pub places: usize,
    pub cutoff: Cutoff,
    /// Admitted applicants in admission order: priority ascending, then score descending.
    pub admitted: Vec<ApplicantRecord>,
    pub statistics: PriorityStatistics,
}

/// Stateless allocator applying the priority-bucket seat rule to a roster partition.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    catalog: Arc<ProgramCatalog>,
}

impl RankingEngine {
    pub fn new(catalog: Arc<ProgramCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    /// Rank one partition. Records outside `key` are ignored.
    pub fn rank(
        &self,
        key: &RosterKey,
        records: &[ApplicantRecord],
    ) -> Result<RankingOutcome, RankingError> {
        let places = self
            .catalog
            .places(&key.program)
            .ok_or_else(|| RankingError::UnknownProgram { key: key.clone() })?;

        let partition = FilterSet::partition(key).apply(records);
        ensure_unique(key, &partition)?;

        let candidates = FilterSet::consenting(key).apply(partition.iter().copied());
        let admitted = allocate(&candidates, places);

        let cutoff = match admitted.last() {
            Some(last) if admitted.len() == places => Cutoff::Score(last.total_score),
            _ => Cutoff::Undersubscribed,
        };

        let statistics = statistics::aggregate(partition.iter().copied(), &admitted);

        Ok(RankingOutcome {
            key: key.clone(),
            places,
            cutoff,
            admitted: admitted.into_iter().cloned().collect(),
            statistics,
        })
    }
}

fn ensure_unique(key: &RosterKey, partition: &[&ApplicantRecord]) -> Result<(), RankingError> {
    let mut seen = HashSet::with_capacity(partition.len());
    for record in partition {
        if !seen.insert(record.external_id) {
            return Err(RankingError::DuplicateApplicant {
                key: key.clone(),
                external_id: record.external_id,
            });
        }
    }
    Ok(())
}

/// Greedy allocation: buckets in priority order, scores descending inside a bucket.
/// Stops as soon as every place is taken; later buckets are never looked at.
fn allocate<'a>(candidates: &[&'a ApplicantRecord], places: usize) -> Vec<&'a ApplicantRecord> {
    let mut buckets: [Vec<&'a ApplicantRecord>; 4] = Default::default();
    for candidate in candidates {
        buckets[candidate.priority.index()].push(*candidate);
    }

    let mut admitted = Vec::with_capacity(places.min(candidates.len()));
    for bucket in buckets.iter_mut() {
        if admitted.len() >= places {
            break;
        }

        bucket.sort_by(|left, right| {
            right
                .total_score
                .cmp(&left.total_score)
                .then_with(|| left.external_id.cmp(&right.external_id))
        });

        for candidate in bucket.iter() {
            if admitted.len() >= places {
                break;
            }
            admitted.push(*candidate);
        }
    }

    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admissions::domain::{
        ApplicantId, Priority, ProgramCode, SnapshotDate, SubjectScores,
    };
    use crate::config::ProgramDefinition;

    fn catalog() -> Arc<ProgramCatalog> {
        Arc::new(
            ProgramCatalog::new(vec![
                ProgramDefinition {
                    code: ProgramCode::new("X"),
                    name: "Program X".to_string(),
                    places: 2,
                },
                ProgramDefinition {
                    code: ProgramCode::new("Y"),
                    name: "Program Y".to_string(),
                    places: 5,
                },
            ])
            .expect("valid catalog"),
        )
    }

    fn applicant(
        program: &str,
        external_id: u32,
        priority: u8,
        total_score: u32,
        consent: bool,
    ) -> ApplicantRecord {
        ApplicantRecord {
            id: ApplicantId(u64::from(external_id)),
            external_id: ExternalId(external_id),
            program: ProgramCode::new(program),
            snapshot_date: SnapshotDate::new("D1"),
            consent,
            priority: Priority::try_from(priority).expect("valid priority"),
            scores: SubjectScores::default(),
            total_score,
        }
    }

    fn admitted_ids(outcome: &RankingOutcome) -> Vec<u32> {
        outcome
            .admitted
            .iter()
            .map(|record| record.external_id.0)
            .collect()
    }

    #[test]
    fn priority_one_fills_capacity_before_higher_scores_elsewhere() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![
            applicant("X", 1, 1, 80, true),
            applicant("X", 2, 1, 90, true),
            applicant("X", 3, 2, 100, true),
        ];

        let outcome = engine
            .rank(&RosterKey::new("X", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(admitted_ids(&outcome), vec![2, 1]);
        assert_eq!(outcome.cutoff, Cutoff::Score(80));
        assert_eq!(outcome.statistics.admissions.priority_2, 0);
    }

    #[test]
    fn fewer_consenting_applicants_than_places_is_undersubscribed() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![
            applicant("Y", 1, 1, 250, true),
            applicant("Y", 2, 2, 240, true),
            applicant("Y", 3, 4, 230, true),
            applicant("Y", 4, 1, 290, false),
        ];

        let outcome = engine
            .rank(&RosterKey::new("Y", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(outcome.cutoff, Cutoff::Undersubscribed);
        assert_eq!(outcome.cutoff.score(), None);
        assert_eq!(outcome.admitted.len(), 3);
        assert_eq!(outcome.statistics.total_applications, 3);
        assert_eq!(outcome.statistics.roster_size, 4);
    }

    #[test]
    fn empty_candidate_pool_is_undersubscribed() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![applicant("X", 1, 1, 250, false)];

        let outcome = engine
            .rank(&RosterKey::new("X", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(outcome.cutoff, Cutoff::Undersubscribed);
        assert!(outcome.admitted.is_empty());
    }

    #[test]
    fn lower_priority_buckets_fill_remaining_places() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![
            applicant("Y", 10, 3, 300, true),
            applicant("Y", 11, 1, 150, true),
            applicant("Y", 12, 2, 200, true),
            applicant("Y", 13, 4, 290, true),
            applicant("Y", 14, 2, 210, true),
            applicant("Y", 15, 4, 295, true),
        ];

        let outcome = engine
            .rank(&RosterKey::new("Y", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(admitted_ids(&outcome), vec![11, 14, 12, 10, 15]);
        // last admitted, not the numerically lowest admitted score
        assert_eq!(outcome.cutoff, Cutoff::Score(295));
        assert_eq!(outcome.statistics.admissions.priority_4, 1);
        assert_eq!(outcome.statistics.applications.priority_4, 2);
    }

    #[test]
    fn equal_scores_break_ties_by_external_id() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![
            applicant("X", 30, 1, 200, true),
            applicant("X", 10, 1, 200, true),
            applicant("X", 20, 1, 200, true),
        ];

        let outcome = engine
            .rank(&RosterKey::new("X", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(admitted_ids(&outcome), vec![10, 20]);
    }

    #[test]
    fn unknown_program_is_a_configuration_error() {
        let engine = RankingEngine::new(catalog());
        let key = RosterKey::new("Z", "D1");
        let err = engine
            .rank(&key, &[applicant("Z", 1, 1, 100, true)])
            .expect_err("unknown program");
        assert_eq!(err, RankingError::UnknownProgram { key: key.clone() });
        assert_eq!(err.key(), &key);
    }

    #[test]
    fn duplicate_external_ids_are_rejected() {
        let engine = RankingEngine::new(catalog());
        let roster = vec![
            applicant("X", 7, 1, 100, true),
            applicant("X", 7, 2, 120, false),
        ];
        let err = engine
            .rank(&RosterKey::new("X", "D1"), &roster)
            .expect_err("duplicate applicant");
        assert!(matches!(
            err,
            RankingError::DuplicateApplicant { external_id: ExternalId(7), .. }
        ));
    }

    #[test]
    fn records_from_other_partitions_are_ignored() {
        let engine = RankingEngine::new(catalog());
        let mut other_day = applicant("X", 4, 1, 300, true);
        other_day.snapshot_date = SnapshotDate::new("D2");
        let roster = vec![
            applicant("X", 1, 1, 80, true),
            applicant("Y", 2, 1, 99, true),
            other_day,
        ];

        let outcome = engine
            .rank(&RosterKey::new("X", "D1"), &roster)
            .expect("ranking succeeds");

        assert_eq!(admitted_ids(&outcome), vec![1]);
        assert_eq!(outcome.statistics.roster_size, 1);
    }

    #[test]
    fn ranking_is_idempotent() {
        let engine = RankingEngine::new(catalog());
        let roster: Vec<_> = (0..12)
            .map(|n| applicant("Y", n, (n % 4 + 1) as u8, 150 + (n * 7) % 40, n % 5 != 0))
            .collect();
        let key = RosterKey::new("Y", "D1");

        let first = engine.rank(&key, &roster).expect("first run");
        let second = engine.rank(&key, &roster).expect("second run");
        assert_eq!(first, second);
    }

    #[test]
    fn admission_respects_capacity_and_priority_dominance() {
        let engine = RankingEngine::new(catalog());
        for seed in 0u32..40 {
            let roster: Vec<_> = (0..(seed % 9))
                .map(|n| {
                    let mixed = (seed * 31 + n * 17) % 97;
                    applicant("Y", n, (mixed % 4 + 1) as u8, 100 + mixed, mixed % 3 != 0)
                })
                .collect();

            let outcome = engine
                .rank(&RosterKey::new("Y", "D1"), &roster)
                .expect("ranking succeeds");

            assert!(outcome.admitted.len() <= outcome.places);

            let consenting = roster.iter().filter(|record| record.consent).count();
            if consenting < outcome.places {
                assert_eq!(outcome.cutoff, Cutoff::Undersubscribed);
            }

            let worst_admitted = outcome.admitted.iter().map(|r| r.priority).max();
            if let Some(worst) = worst_admitted {
                let skipped_better = roster.iter().any(|record| {
                    record.consent
                        && record.priority < worst
                        && !outcome.admitted.iter().any(|a| a.external_id == record.external_id)
                });
                assert!(!skipped_better, "seed {seed} admitted past an unadmitted higher priority");
            }
        }
    }
}
