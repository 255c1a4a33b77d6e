// --------------------------------------------------
// Handles API endpoints related to a single task.
//
// Responsibilities:
// - Relay the revision log ("activities") of a task
// -------------------------------------------------

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::{bad_request, message_response};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TaskActivitiesInput {
    pub project: Option<String>,
}

// -----------------------------
// POST /api/task/:taskId/activities
// Every revision of the task, as returned upstream
// -----------------------------
pub async fn get_task_activities(
    State(state): State<AppState>,
    task_id: Result<Path<u64>, PathRejection>,
    body: Result<Json<TaskActivitiesInput>, JsonRejection>,
) -> impl IntoResponse {
    let task_id = match task_id {
        Ok(Path(task_id)) => task_id,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(project) = input.project.filter(|p| !p.trim().is_empty()) else {
        return message_response(StatusCode::BAD_REQUEST, "Project is a required parameter.");
    };

    match state.tracker.task_revisions(&project, task_id).await {
        Ok(revisions) => Json(revisions).into_response(),
        Err(e) => e.into_response(),
    }
}
