use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::admissions::router::admissions_router;
use crate::admissions::service::AdmissionsService;

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request")
}

#[tokio::test]
async fn import_route_accepts_csv_and_reports_skips() {
    let (service, _) = build_service();
    let router = admissions_router(service.clone());
    let mut csv = csv_roster(&[applicant(1, 1, 200), applicant(2, 2, 190)]);
    csv.push_str("\n3,true,9,70,70,70,0,210");

    let response = router
        .oneshot(
            Request::post("/api/v1/admissions/rosters/X/02.08")
                .header(header::CONTENT_TYPE, "text/csv")
                .body(Body::from(csv))
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["imported"], 2);
    assert_eq!(payload["skipped"][0]["line"], 4);
    assert_eq!(payload["key"]["program"], "X");
}

#[tokio::test]
async fn import_route_rejects_files_without_required_columns() {
    let (service, _) = build_service();
    let router = admissions_router(service);

    let response = router
        .oneshot(
            Request::post("/api/v1/admissions/rosters/X/02.08")
                .body(Body::from("id,consent\n1,true"))
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert!(payload["error"]
        .as_str()
        .expect("message")
        .contains("priority"));
}

#[tokio::test]
async fn rank_route_returns_cutoff_and_label() {
    let (service, _) = build_service();
    seed_scenario(&service);
    let router = admissions_router(service);

    let response = router
        .oneshot(
            Request::post("/api/v1/admissions/rankings/X/D1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["cutoff"], json!({ "score": 80 }));
    assert_eq!(payload["label"], "80");
    assert_eq!(payload["admitted"], 2);
}

#[tokio::test]
async fn rank_handler_maps_unknown_program_to_unprocessable() {
    let (service, _) = build_service();

    let response = crate::admissions::router::rank_handler(
        State(service),
        Path(("Z".to_string(), "D1".to_string())),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn rank_handler_maps_storage_failure_to_internal_error() {
    let service = Arc::new(AdmissionsService::new(
        Arc::new(UnavailableRepository),
        catalog(),
    ));

    let response = crate::admissions::router::rank_handler::<UnavailableRepository>(
        State(service),
        Path(("X".to_string(), "D1".to_string())),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn batch_route_ranks_every_date_in_the_background() {
    let (service, _) = build_service();
    seed_scenario(&service);
    let router = admissions_router(service.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/admissions/rankings")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["ranked"].as_array().expect("ranked").len(), 2);
    assert_eq!(payload["cancelled"], false);

    let views = service.all_cutoffs().expect("cutoffs");
    assert_eq!(views.len(), 2);
}

#[tokio::test]
async fn cutoffs_route_lists_every_program_for_a_date() {
    let (service, _) = build_service();
    let key = seed_scenario(&service);
    service.rank(&key).expect("rank");
    let router = admissions_router(service);

    let response = router
        .oneshot(
            Request::get("/api/v1/admissions/cutoffs?date=D1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let views = payload.as_array().expect("array");
    assert_eq!(views.len(), 2);
    assert_eq!(views[0]["label"], "80");
    assert_eq!(views[0]["status"], "current");
    assert_eq!(views[1]["label"], "-");
    assert_eq!(views[1]["status"], "not_computed");
}

#[tokio::test]
async fn query_route_applies_conditions_in_order() {
    let (service, _) = build_service();
    seed_scenario(&service);
    let router = admissions_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/admissions/query",
            json!({
                "conditions": [
                    { "field": "priority", "operator": "=", "value": 2 },
                    { "field": "total_score", "operator": ">=", "value": 90, "combinator": "OR" },
                    { "field": "height", "operator": "=", "value": 3 }
                ]
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let ids: Vec<_> = payload["applicants"]
        .as_array()
        .expect("applicants")
        .iter()
        .map(|applicant| applicant["external_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(3), json!(2)]);
    assert_eq!(payload["dropped"][0]["index"], 2);
}

#[tokio::test]
async fn deletion_route_flags_results_stale() {
    let (service, _) = build_service();
    let key = seed_scenario(&service);
    service.rank(&key).expect("rank");
    let router = admissions_router(service.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/admissions/deletions",
            json!({ "by": "external_id", "external_id": 2, "program": "X", "snapshot_date": "D1" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await["deleted"], 1);

    let response = router
        .oneshot(
            Request::get("/api/v1/admissions/rankings/stale")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    let payload = read_json_body(response).await;
    assert_eq!(payload, json!([{ "program": "X", "snapshot_date": "D1" }]));
}

#[tokio::test]
async fn empty_filter_deletion_is_a_bad_request() {
    let (service, _) = build_service();
    seed_scenario(&service);
    let router = admissions_router(service.clone());

    let response = router
        .oneshot(post_json(
            "/api/v1/admissions/deletions",
            json!({ "by": "filters", "conditions": [] }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(service.count(None, None).expect("count"), 3);
}

#[tokio::test]
async fn delete_applicant_route_returns_not_found_for_unknown_ids() {
    let (service, _) = build_service();
    let router = admissions_router(service);

    let response = router
        .oneshot(
            Request::delete("/api/v1/admissions/applicants/404")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert_eq!(payload["id"], 404);
}

#[tokio::test]
async fn compare_route_reports_deltas() {
    let (service, _) = build_service();
    seed_scenario(&service);
    let router = admissions_router(service);

    let response = router
        .oneshot(
            Request::get("/api/v1/admissions/compare?first=D0&second=D1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["applicant_delta"], 3);
    assert_eq!(payload["first"]["mean_total_score"], Value::Null);
    assert_eq!(payload["mean_total_score_delta"], Value::Null);
}
