//! Status surface for running dispatchers
//!
//! Small HTTP server exposing job progress as JSON and engine metrics in
//! the Prometheus text format. The engine itself never formats anything for
//! display; this surface just serializes what the store and the metrics
//! registry already hold.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatch::report::elapsed_secs;
use crate::metrics;
use crate::models::ProgressSnapshot;
use crate::storage::{JobRepository, Stores};

/// Shared state for the status server
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
}

/// Liveness payload
#[derive(Debug, Serialize)]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
}

/// Build the status router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/jobs", get(list_jobs))
        .route("/status/{job_id}", get(job_status))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown future resolves
pub async fn start_with_shutdown(
    addr: &str,
    state: AppState,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "Status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Status server shutdown complete");
    Ok(())
}

async fn liveness() -> impl IntoResponse {
    Json(LivenessResponse {
        status: "alive",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    match state.stores.jobs.list_jobs() {
        Ok(jobs) => {
            let snapshots: Vec<ProgressSnapshot> = jobs
                .iter()
                .map(|job| ProgressSnapshot {
                    job_id: job.id.clone(),
                    status: job.status,
                    sent: job.sent_count,
                    failed: job.failed_count,
                    total: job.total_targets,
                    elapsed_secs: elapsed_secs(job),
                })
                .collect();
            Json(snapshots).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.stores.jobs.get_job(&job_id) {
        Ok(Some(job)) => Json(ProgressSnapshot {
            job_id: job.id.clone(),
            status: job.status,
            sent: job.sent_count,
            failed: job.failed_count,
            total: job.total_targets,
            elapsed_secs: elapsed_secs(&job),
        })
        .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("no such job: {job_id}")).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn metrics_text() -> impl IntoResponse {
    metrics::render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecMode, Job};

    #[tokio::test]
    async fn test_router_builds() {
        let state = AppState {
            stores: Stores::in_memory(),
        };
        let _router = router(state);
    }

    #[tokio::test]
    async fn test_job_status_payload() {
        let stores = Stores::in_memory();
        let job = Job::new("j", ExecMode::Normal, "m", vec!["a".into()], vec![]);
        stores.jobs.insert_job(&job).unwrap();

        let state = AppState {
            stores: stores.clone(),
        };
        let response = job_status(State(state), Path(job.id.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
