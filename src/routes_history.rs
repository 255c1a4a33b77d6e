use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate;
use crate::error::{bad_request, message_response};
use crate::logic;
use crate::models::{TimeInState, WorkItemTimeInState};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkItemHistoryInput {
    pub project: Option<String>,
    pub id: Option<IdValue>,
}

/// Work item id as clients send it: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Number(u64),
    Text(String),
}

impl IdValue {
    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkItemHistoryResponse {
    pub data: TimeInState,
}

#[derive(Debug, Deserialize)]
pub struct AllHistoryInput {
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllHistoryResponse {
    pub work_items_state_times: Vec<WorkItemTimeInState>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// -----------------------------
// POST /api/projects/getWorkItemHistory
// Working time per state for one work item
// -----------------------------
pub async fn get_work_item_history(
    State(state): State<AppState>,
    body: Result<Json<WorkItemHistoryInput>, JsonRejection>,
) -> impl IntoResponse {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(project) = required(input.project) else {
        return message_response(StatusCode::BAD_REQUEST, "Project is a required parameter.");
    };
    let Some(id) = input.id else {
        return message_response(StatusCode::BAD_REQUEST, "ID is a required parameter.");
    };
    let Some(id) = id.as_id() else {
        return message_response(StatusCode::BAD_REQUEST, "ID must be a work item number.");
    };

    let updates = match state.tracker.work_item_history(&project, id).await {
        Ok(updates) => updates,
        Err(e) => return e.into_response(),
    };

    let data = logic::time_in_state(&updates, &state.calendar, state.clock.now());
    info!(project = %project, work_item_id = id, "computed time in state");

    Json(WorkItemHistoryResponse { data }).into_response()
}

// -----------------------------
// POST /api/projects/all-workitems-history
// Working time per state for every work item in a project
// -----------------------------
pub async fn get_all_work_items_history(
    State(state): State<AppState>,
    body: Result<Json<AllHistoryInput>, JsonRejection>,
) -> impl IntoResponse {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(project) = required(input.project) else {
        return message_response(StatusCode::BAD_REQUEST, "Project is a required parameter.");
    };

    let now = state.clock.now();
    match aggregate::project_time_in_state(Arc::clone(&state.tracker), &project, &state.calendar, now)
        .await
    {
        Ok(work_items_state_times) => Json(AllHistoryResponse {
            work_items_state_times,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
