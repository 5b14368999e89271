//! Operator endpoints: inspect and requeue envelopes, inspect and resume sagas.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::AggregateId;
use outbox::{EnvelopeId, EnvelopeQuery, EnvelopeStatus, EventEnvelope};
use saga::{SagaInstance, SagaStatus};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Serialize)]
pub struct RequeueResponse {
    pub id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ResumeResponse {
    pub saga_id: String,
    pub outcome: &'static str,
    pub status: SagaStatus,
}

/// GET /operator/envelopes?status=failed&limit=N
#[tracing::instrument(skip(state))]
pub async fn list_envelopes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EventEnvelope>>, ApiError> {
    let mut query = EnvelopeQuery::new().limit(params.limit());
    if let Some(status) = params.status.as_deref() {
        let status = EnvelopeStatus::parse(status)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown envelope status '{status}'")))?;
        query = query.status(status);
    }

    Ok(Json(state.outbox.query(query).await?))
}

/// POST /operator/envelopes/{id}/requeue — puts a Failed envelope back in line.
#[tracing::instrument(skip(state))]
pub async fn requeue_envelope(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let envelope_id: EnvelopeId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid envelope id: {e}")))?;

    if !state.outbox.requeue_failed(envelope_id).await? {
        return Err(ApiError::Conflict(format!(
            "Envelope {envelope_id} is not failed"
        )));
    }
    tracing::info!(%envelope_id, "envelope requeued by operator");
    state.signal.notify();

    Ok(Json(RequeueResponse {
        id: envelope_id.to_string(),
        status: EnvelopeStatus::Pending.as_str(),
    }))
}

/// GET /operator/sagas?status=faulted
#[tracing::instrument(skip(state))]
pub async fn list_sagas(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SagaInstance>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|status| {
            SagaStatus::parse(status)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown saga status '{status}'")))
        })
        .transpose()?;

    Ok(Json(state.sagas.list(status, params.limit()).await?))
}

/// POST /operator/sagas/{id}/resume — re-runs the failed step of a Faulted saga.
#[tracing::instrument(skip(state))]
pub async fn resume_saga(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let saga_id: AggregateId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id: {e}")))?;

    let outcome = state.order_delivery.resume(saga_id).await?;
    let status = state
        .sagas
        .load(saga_id)
        .await?
        .map(|saga| saga.status)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {saga_id} not found")))?;

    Ok(Json(ResumeResponse {
        saga_id: saga_id.to_string(),
        outcome: outcome.as_str(),
        status,
    }))
}
