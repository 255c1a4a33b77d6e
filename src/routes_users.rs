use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{bad_request, message_response};
use crate::membership;
use crate::models::GraphUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserEmailInput {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProjectsResponse {
    pub user: GraphUser,
    pub project_count: usize,
    pub projects: Vec<ProjectName>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectName {
    pub project_name: String,
}

// -----------------------------
// POST /api/user/getUserByEmail
// A user and the projects they are a team member of
// -----------------------------
pub async fn get_user_by_email(
    State(state): State<AppState>,
    body: Result<Json<UserEmailInput>, JsonRejection>,
) -> impl IntoResponse {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(email) = input.email.filter(|e| !e.trim().is_empty()) else {
        return message_response(StatusCode::BAD_REQUEST, "Email is required");
    };

    let found = match membership::user_projects(Arc::clone(&state.tracker), email.trim()).await {
        Ok(found) => found,
        Err(e) => return e.into_response(),
    };

    Json(UserProjectsResponse {
        user: found.user,
        project_count: found.projects.len(),
        projects: found
            .projects
            .into_iter()
            .map(|project_name| ProjectName { project_name })
            .collect(),
    })
    .into_response()
}
