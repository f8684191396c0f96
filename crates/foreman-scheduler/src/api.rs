//! HTTP API handlers for the scheduler.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use foreman_proto::{AgentDescriptor, Job, JobState};

use crate::engine::SchedulerHandle;

/// Shared application state.
pub struct AppState {
    pub scheduler: SchedulerHandle,
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Jobs
        .route("/jobs", post(submit_job))
        .route("/jobs", get(list_jobs))
        // Agents
        .route("/agents", get(list_agents))
        // Scheduling control
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint. Ready once at least one agent is registered.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agent_count = match state.scheduler.agent_summary().await {
        Ok(summary) => summary.agents.len(),
        Err(_) => return (StatusCode::SERVICE_UNAVAILABLE, Json(ReadyResponse::not_ready())),
    };

    if agent_count > 0 {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                agents: agent_count,
            }),
        )
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ReadyResponse::not_ready()))
    }
}

/// Submit a job.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), StatusCode> {
    let job = state
        .scheduler
        .submit_job(request.worker_type, request.params)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// List every job the scheduler knows about.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobResponse>>, StatusCode> {
    let summary = state
        .scheduler
        .job_summary()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(summary.jobs.into_iter().map(JobResponse::from).collect()))
}

/// List all registered agents.
async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentResponse>>, StatusCode> {
    let summary = state
        .scheduler
        .agent_summary()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(summary.agents.into_iter().map(AgentResponse::from).collect()))
}

/// Pause scheduling.
async fn pause(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    state
        .scheduler
        .pause()
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// Resume scheduling.
async fn resume(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    state
        .scheduler
        .resume()
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// Metrics endpoint.
async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    let jobs = state
        .scheduler
        .job_summary()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let agents = state
        .scheduler
        .agent_summary()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let count = |s: JobState| jobs.jobs.iter().filter(|j| j.state == s).count();

    Ok(format!(
        "# HELP foreman_agents Number of registered agents\n\
         # TYPE foreman_agents gauge\n\
         foreman_agents {}\n\n\
         # HELP foreman_jobs_queued Jobs awaiting assignment\n\
         # TYPE foreman_jobs_queued gauge\n\
         foreman_jobs_queued {}\n\n\
         # HELP foreman_jobs_running Jobs currently executing on agents\n\
         # TYPE foreman_jobs_running gauge\n\
         foreman_jobs_running {}\n\n\
         # HELP foreman_jobs_complete Jobs that ran to completion\n\
         # TYPE foreman_jobs_complete gauge\n\
         foreman_jobs_complete {}\n\n\
         # HELP foreman_jobs_failed Jobs that failed terminally\n\
         # TYPE foreman_jobs_failed gauge\n\
         foreman_jobs_failed {}\n",
        agents.agents.len(),
        count(JobState::Queued),
        count(JobState::Running),
        count(JobState::Complete),
        count(JobState::Failed),
    ))
}

// Request and response types

#[derive(Deserialize)]
struct SubmitJobRequest {
    worker_type: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    agents: usize,
}

impl ReadyResponse {
    const fn not_ready() -> Self {
        Self {
            ready: false,
            agents: 0,
        }
    }
}

#[derive(Serialize)]
pub struct JobResponse {
    pub id: u64,
    pub worker_type: String,
    pub state: String,
    pub progress: f64,
    pub params: BTreeMap<String, String>,
    pub enqueued_at: String,
    pub error: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            worker_type: job.worker_type,
            state: format!("{:?}", job.state),
            progress: job.progress,
            params: job.params,
            enqueued_at: job.enqueued_at.to_rfc3339(),
            error: job.error,
        }
    }
}

#[derive(Serialize)]
pub struct AgentResponse {
    pub address: String,
    pub worker_types: Vec<String>,
}

impl From<AgentDescriptor> for AgentResponse {
    fn from(agent: AgentDescriptor) -> Self {
        Self {
            address: agent.address,
            worker_types: agent.worker_types.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::engine::SchedulerEngine;
    use crate::policy::build_policy;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_app_state() -> Arc<AppState> {
        let timing = crate::config::TimingConfig::default();
        let policy = build_policy(&PolicyConfig::default());
        let (engine, handle) = SchedulerEngine::new(timing, policy, None);
        tokio::spawn(engine.run());
        Arc::new(AppState { scheduler: handle })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let state = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_requires_an_agent() {
        let state = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn jobs_list_empty() {
        let state = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_job_created() {
        let state = make_app_state();
        let app = router(state);

        let body = serde_json::json!({ "worker_type": "video-encode" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn pause_and_resume_accepted() {
        let state = make_app_state();
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pause")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/resume")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
