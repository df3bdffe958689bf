//! Job intake endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use fulfillment::{Job, JobScheduler};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Longest accepted delay: one week.
const MAX_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub job: Job,
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub job: &'static str,
    pub queued: String,
    pub delay_secs: Option<u64>,
}

/// POST /jobs: enqueue a job, optionally delayed.
#[tracing::instrument(skip(state, req))]
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    if let Some(delay) = req.delay_secs
        && delay > MAX_DELAY_SECS
    {
        return Err(ApiError::BadRequest(format!(
            "delay_secs must be at most {MAX_DELAY_SECS}"
        )));
    }

    let response = EnqueueResponse {
        job: req.job.name(),
        queued: req.job.to_string(),
        delay_secs: req.delay_secs,
    };
    state
        .scheduler
        .schedule(req.job, req.delay_secs.map(Duration::from_secs))
        .await?;
    tracing::info!(job = %response.queued, delay_secs = ?response.delay_secs, "job accepted");

    Ok((StatusCode::ACCEPTED, Json(response)))
}
