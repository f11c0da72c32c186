use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use super::domain::{ApplicantId, ExternalId, NewApplicant, ProgramCode, RosterKey, SnapshotDate};
use super::filter::RawCondition;
use super::import;
use super::ranking::RankingError;
use super::repository::{AdmissionsRepository, RosterError};
use super::service::{
    AdmissionsService, AdmissionsServiceError, BatchProgress, BatchReport, CancellationFlag,
};

/// Router builder exposing roster import, ranking and reporting endpoints.
pub fn admissions_router<R>(service: Arc<AdmissionsService<R>>) -> Router
where
    R: AdmissionsRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/admissions/rosters/:program/:date",
            get(roster_handler::<R>)
                .post(import_handler::<R>)
                .delete(delete_partition_handler::<R>),
        )
        .route(
            "/api/v1/admissions/rosters/:program/:date/applicants",
            put(upsert_handler::<R>),
        )
        .route(
            "/api/v1/admissions/rankings/:program/:date",
            post(rank_handler::<R>),
        )
        .route("/api/v1/admissions/rankings", post(rank_all_handler::<R>))
        .route(
            "/api/v1/admissions/rankings/stale",
            get(stale_handler::<R>).post(recompute_stale_handler::<R>),
        )
        .route(
            "/api/v1/admissions/admitted/:program/:date",
            get(admitted_handler::<R>),
        )
        .route("/api/v1/admissions/cutoffs", get(cutoffs_handler::<R>))
        .route(
            "/api/v1/admissions/statistics/:date",
            get(statistics_handler::<R>),
        )
        .route("/api/v1/admissions/dates", get(dates_handler::<R>))
        .route("/api/v1/admissions/count", get(count_handler::<R>))
        .route("/api/v1/admissions/compare", get(compare_handler::<R>))
        .route("/api/v1/admissions/query", post(query_handler::<R>))
        .route("/api/v1/admissions/deletions", post(deletion_handler::<R>))
        .route(
            "/api/v1/admissions/applicants/:id",
            axum::routing::delete(delete_applicant_handler::<R>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct CutoffQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub program: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub first: String,
    pub second: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub scope: Option<RosterKey>,
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum DeletionRequest {
    ExternalId {
        external_id: ExternalId,
        #[serde(default)]
        program: Option<ProgramCode>,
        #[serde(default)]
        snapshot_date: Option<SnapshotDate>,
    },
    Filters {
        conditions: Vec<RawCondition>,
    },
}

pub(crate) async fn import_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
    body: String,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    let outcome = import::read_roster(body.as_bytes())
        .map_err(AdmissionsServiceError::from)
        .and_then(|roster| service.import_roster(&key, roster));

    match outcome {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn roster_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    match service.query(Some(&key), &[]) {
        Ok(result) => (StatusCode::OK, Json(result.applicants)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn upsert_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
    Json(applicant): Json<NewApplicant>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    match service.upsert_applicant(&key, applicant) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn delete_partition_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    match service.delete_partition(&key) {
        Ok(removed) => {
            (StatusCode::OK, Json(json!({ "key": key, "deleted": removed }))).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn rank_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    match service.rank(&key) {
        Ok(outcome) => {
            let payload = json!({
                "key": outcome.key,
                "places": outcome.places,
                "cutoff": outcome.cutoff,
                "label": outcome.cutoff.label(),
                "admitted": outcome.admitted.len(),
                "statistics": outcome.statistics,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn rank_all_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    run_batch(service, |service, cancellation| {
        service.rank_all(cancellation, log_progress)
    })
    .await
}

pub(crate) async fn recompute_stale_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    run_batch(service, |service, cancellation| {
        service.recompute_stale(cancellation, log_progress)
    })
    .await
}

pub(crate) async fn stale_handler<R>(State(service): State<Arc<AdmissionsService<R>>>) -> Response
where
    R: AdmissionsRepository + 'static,
{
    match service.stale_keys() {
        Ok(keys) => (StatusCode::OK, Json(keys)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn admitted_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path((program, date)): Path<(String, String)>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let key = RosterKey::new(program, date);
    match service.admitted(&key) {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn cutoffs_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Query(query): Query<CutoffQuery>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let cutoffs = match query.date {
        Some(date) => service.cutoffs_for_date(&SnapshotDate::new(date)),
        None => service.all_cutoffs(),
    };

    match cutoffs {
        Ok(views) => (StatusCode::OK, Json(views)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn statistics_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path(date): Path<String>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    match service.statistics_for_date(&SnapshotDate::new(date)) {
        Ok(views) => (StatusCode::OK, Json(views)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn dates_handler<R>(State(service): State<Arc<AdmissionsService<R>>>) -> Response
where
    R: AdmissionsRepository + 'static,
{
    match service.dates() {
        Ok(dates) => (StatusCode::OK, Json(dates)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn count_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Query(query): Query<CountQuery>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let program = query.program.map(ProgramCode::new);
    let date = query.date.map(SnapshotDate::new);
    match service.count(program.as_ref(), date.as_ref()) {
        Ok(count) => (StatusCode::OK, Json(json!({ "count": count }))).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn compare_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Query(query): Query<CompareQuery>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let first = SnapshotDate::new(query.first);
    let second = SnapshotDate::new(query.second);
    match service.compare_dates(&first, &second) {
        Ok(comparison) => (StatusCode::OK, Json(comparison)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn query_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Json(request): Json<QueryRequest>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    match service.query(request.scope.as_ref(), &request.conditions) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn deletion_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Json(request): Json<DeletionRequest>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    let outcome = match request {
        DeletionRequest::ExternalId {
            external_id,
            program,
            snapshot_date,
        } => service.delete_by_external_id(external_id, program.as_ref(), snapshot_date.as_ref()),
        DeletionRequest::Filters { conditions } => service.delete_by_filters(&conditions),
    };

    match outcome {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn delete_applicant_handler<R>(
    State(service): State<Arc<AdmissionsService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: AdmissionsRepository + 'static,
{
    match service.delete_by_id(ApplicantId(id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(AdmissionsServiceError::Roster(RosterError::NotFound)) => {
            let payload = json!({
                "error": "applicant not found",
                "id": id,
            });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

async fn run_batch<R, F>(service: Arc<AdmissionsService<R>>, batch: F) -> Response
where
    R: AdmissionsRepository + 'static,
    F: FnOnce(&AdmissionsService<R>, &CancellationFlag) -> Result<BatchReport, AdmissionsServiceError>
        + Send
        + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let cancellation = CancellationFlag::new();
        batch(&service, &cancellation)
    })
    .await;

    match joined {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(other)) => error_response(other),
        Err(join_error) => {
            error!(%join_error, "batch ranking task failed");
            let payload = json!({ "error": "batch ranking task failed" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

fn log_progress(progress: &BatchProgress) {
    debug!(
        key = %progress.key,
        processed = progress.processed,
        total = progress.total,
        percent = progress.percent(),
        "batch progress"
    );
}

fn error_response(error: AdmissionsServiceError) -> Response {
    let status = match &error {
        AdmissionsServiceError::Roster(RosterError::NotFound) => StatusCode::NOT_FOUND,
        AdmissionsServiceError::Roster(RosterError::Integrity(_))
        | AdmissionsServiceError::Ranking(RankingError::DuplicateApplicant { .. }) => {
            StatusCode::CONFLICT
        }
        AdmissionsServiceError::Ranking(RankingError::UnknownProgram { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AdmissionsServiceError::Import(_) | AdmissionsServiceError::EmptyDeletionFilter => {
            StatusCode::BAD_REQUEST
        }
        AdmissionsServiceError::Roster(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": error.to_string() });
    (status, Json(payload)).into_response()
}
