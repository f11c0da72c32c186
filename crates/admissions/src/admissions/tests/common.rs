use std::sync::Arc;

use axum::response::Response;
use serde_json::Value;

use crate::admissions::domain::{
    ApplicantRecord, ExternalId, NewApplicant, Priority, ProgramCode, RosterKey, SubjectScores,
};
use crate::admissions::repository::{
    AdmissionsRepository, CutoffRecord, MemoryRepository, PartitionSnapshot, PartitionWrite,
    RosterError, StatisticsRecord,
};
use crate::admissions::service::AdmissionsService;
use crate::config::{ProgramCatalog, ProgramDefinition};

pub(super) const HEADER: &str =
    "id,consent,priority,physics_score,russian_score,math_score,achievements_score,total_score";

/// `X` with two places and `Y` with five.
pub(super) fn catalog() -> Arc<ProgramCatalog> {
    let programs = vec![
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
    ];
    Arc::new(ProgramCatalog::new(programs).expect("valid catalog"))
}

pub(super) fn applicant(external_id: u32, priority: u8, total_score: u32) -> NewApplicant {
    NewApplicant {
        external_id: ExternalId(external_id),
        consent: true,
        priority: Priority::try_from(priority).expect("valid priority"),
        scores: SubjectScores {
            physics: total_score / 3,
            russian: total_score / 3,
            math: total_score - 2 * (total_score / 3),
            achievements: 0,
        },
        total_score,
    }
}

pub(super) fn without_consent(mut applicant: NewApplicant) -> NewApplicant {
    applicant.consent = false;
    applicant
}

pub(super) fn csv_row(applicant: &NewApplicant) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        applicant.external_id,
        applicant.consent,
        applicant.priority,
        applicant.scores.physics,
        applicant.scores.russian,
        applicant.scores.math,
        applicant.scores.achievements,
        applicant.total_score
    )
}

pub(super) fn csv_roster(applicants: &[NewApplicant]) -> String {
    let mut csv = String::from(HEADER);
    for applicant in applicants {
        csv.push('\n');
        csv.push_str(&csv_row(applicant));
    }
    csv
}

pub(super) fn build_service() -> (
    Arc<AdmissionsService<MemoryRepository>>,
    Arc<MemoryRepository>,
) {
    let repository = Arc::new(MemoryRepository::new());
    let service = Arc::new(AdmissionsService::new(repository.clone(), catalog()));
    (service, repository)
}

/// Scenario roster for `X@D1`: B and A hold priority 1, C is a stronger priority 2.
pub(super) fn seed_scenario(service: &AdmissionsService<MemoryRepository>) -> RosterKey {
    let key = RosterKey::new("X", "D1");
    for applicant in [applicant(1, 1, 80), applicant(2, 1, 90), applicant(3, 2, 100)] {
        service
            .upsert_applicant(&key, applicant)
            .expect("seed applicant");
    }
    key
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Store whose every call fails as if the backing file system were gone.
pub(super) struct UnavailableRepository;

fn unavailable<T>() -> Result<T, RosterError> {
    Err(RosterError::Unavailable("storage offline".to_string()))
}

impl AdmissionsRepository for UnavailableRepository {
    fn replace_partition(
        &self,
        _key: &RosterKey,
        _applicants: Vec<NewApplicant>,
    ) -> Result<PartitionWrite, RosterError> {
        unavailable()
    }

    fn upsert(
        &self,
        _key: &RosterKey,
        _applicant: NewApplicant,
    ) -> Result<ApplicantRecord, RosterError> {
        unavailable()
    }

    fn partition(&self, _key: &RosterKey) -> Result<PartitionSnapshot, RosterError> {
        unavailable()
    }

    fn all(&self) -> Result<Vec<ApplicantRecord>, RosterError> {
        unavailable()
    }

    fn keys(&self) -> Result<Vec<RosterKey>, RosterError> {
        unavailable()
    }

    fn version(&self, _key: &RosterKey) -> Result<u64, RosterError> {
        unavailable()
    }

    fn delete_where(
        &self,
        _predicate: &dyn Fn(&ApplicantRecord) -> bool,
    ) -> Result<Vec<ApplicantRecord>, RosterError> {
        unavailable()
    }

    fn delete_partition(&self, _key: &RosterKey) -> Result<usize, RosterError> {
        unavailable()
    }

    fn clear(&self) -> Result<(), RosterError> {
        unavailable()
    }

    fn store_results(
        &self,
        _cutoff: CutoffRecord,
        _statistics: StatisticsRecord,
    ) -> Result<(), RosterError> {
        unavailable()
    }

    fn cutoff(&self, _key: &RosterKey) -> Result<Option<CutoffRecord>, RosterError> {
        unavailable()
    }

    fn cutoffs(&self) -> Result<Vec<CutoffRecord>, RosterError> {
        unavailable()
    }

    fn statistics(&self) -> Result<Vec<StatisticsRecord>, RosterError> {
        unavailable()
    }
}
