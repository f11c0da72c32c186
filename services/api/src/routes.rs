use crate::infra::AppState;
use admissions::admissions::{admissions_router, AdmissionsRepository, AdmissionsService};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_admissions_routes<R>(service: Arc<AdmissionsService<R>>) -> axum::Router
where
    R: AdmissionsRepository + 'static,
{
    admissions_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use admissions::admissions::{MemoryRepository, ProgramCode};
    use admissions::config::{ProgramCatalog, ProgramDefinition};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let catalog = ProgramCatalog::new(vec![ProgramDefinition {
            code: ProgramCode::new("PM"),
            name: "Applied Mathematics".to_string(),
            places: 2,
        }])
        .expect("catalog");
        let repository = Arc::new(MemoryRepository::new());
        let service = Arc::new(AdmissionsService::new(repository, Arc::new(catalog)));
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };

        with_admissions_routes(service).layer(Extension(state))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(true)
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app(true)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admissions_routes_are_mounted() {
        let response = app(true)
            .oneshot(
                Request::get("/api/v1/admissions/dates")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let dates: Vec<String> = serde_json::from_slice(&body).expect("json");
        assert!(dates.is_empty());
    }

    #[tokio::test]
    async fn imported_roster_is_visible_through_the_mounted_router() {
        let csv = "id,consent,priority,physics_score,russian_score,math_score,achievements_score,total_score\n\
                   1,true,1,80,80,80,5,245\n";
        let response = app(true)
            .oneshot(
                Request::post("/api/v1/admissions/rosters/PM/01.08")
                    .header(header::CONTENT_TYPE, "text/csv")
                    .body(Body::from(csv))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let report: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(report["imported"], 1);
        assert_eq!(report["key"]["program"], "PM");
    }
}
