//! Command submission endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::Command;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct CommandResponse {
    pub command: &'static str,
    pub aggregate_id: Option<String>,
    pub events: Vec<&'static str>,
}

/// POST /commands — runs one command and its synchronous cascades.
///
/// The body is the tagged command, e.g.
/// `{"command": "PayOrder", "data": {"order_id": "..."}}`.
#[tracing::instrument(skip_all)]
pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<Json<CommandResponse>, ApiError> {
    let name = command.name();
    tracing::debug!(command = name, "command received");
    let outcome = state.bus.send(command).await?;

    Ok(Json(CommandResponse {
        command: name,
        aggregate_id: outcome.aggregate_id.map(|id| id.to_string()),
        events: outcome.events,
    }))
}
