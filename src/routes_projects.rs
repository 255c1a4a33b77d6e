// --------------------------------------------------
// Handles API endpoints that relay project and
// work item data from the tracker.
//
// Responsibilities:
// - List projects / look one up by id
// - Fetch work items by id or by project
// - Count work items across all projects
// -------------------------------------------------

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{bad_request, message_response, UpstreamError};
use crate::models::WorkItem;
use crate::state::AppState;
use crate::upstream::WorkTracker;

#[derive(Debug, Deserialize)]
pub struct WorkItemsQuery {
    pub project: Option<String>,
    pub ids: Option<String>, // "1,2,3"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWorkItemsInput {
    pub project_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemsResponse {
    pub work_items: Vec<WorkItem>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub data: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWithWorkItems {
    pub project: String,
    pub id: Uuid,
    pub state: Option<String>,
    pub work_items: WorkItemsResponse,
}

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub id: Uuid,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectByIdResponse {
    pub project: ProjectSummary,
    pub work_items: WorkItemsResponse,
}

// WIQL ids, then full details for each
async fn project_work_items(
    tracker: &dyn WorkTracker,
    project: &str,
) -> Result<WorkItemsResponse, UpstreamError> {
    let ids: Vec<u64> = tracker
        .project_work_items(project)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();

    if ids.is_empty() {
        return Ok(WorkItemsResponse { work_items: Vec::new() });
    }

    let work_items = tracker.work_item_details(&ids).await?;
    Ok(WorkItemsResponse { work_items })
}

// -----------------------------
// GET /api/projects/getAllProjects
// -----------------------------
pub async fn get_all_projects(State(state): State<AppState>) -> impl IntoResponse {
    match state.tracker.projects().await {
        Ok(projects) => Json(projects).into_response(),
        Err(e) => e.into_response(),
    }
}

// -----------------------------
// GET /api/projects/getWorkItems?project=..&ids=..
// -----------------------------
pub async fn get_work_items(
    State(state): State<AppState>,
    Query(q): Query<WorkItemsQuery>,
) -> impl IntoResponse {
    let (Some(project), Some(ids)) = (q.project, q.ids) else {
        return message_response(
            StatusCode::BAD_REQUEST,
            "Project and IDs are required parameters.",
        );
    };

    match state.tracker.work_items(&project, &ids).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => e.into_response(),
    }
}

// -----------------------------
// GET /api/projects/getTotalWorkItem
// Sum of work items over every project
// -----------------------------
pub async fn get_total_work_items(State(state): State<AppState>) -> impl IntoResponse {
    let projects = match state.tracker.projects().await {
        Ok(p) => p.value,
        Err(e) => return e.into_response(),
    };

    let mut total = 0;
    for project in &projects {
        match state.tracker.project_work_items(&project.name).await {
            Ok(items) => total += items.len(),
            Err(e) => return e.into_response(),
        }
    }

    Json(CountResponse { data: total }).into_response()
}

// -----------------------------
// POST /api/projects/getProjectWorkItems
// -----------------------------
pub async fn get_project_work_items(
    State(state): State<AppState>,
    body: Result<Json<ProjectWorkItemsInput>, JsonRejection>,
) -> impl IntoResponse {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(project) = input.project_name.filter(|p| !p.trim().is_empty()) else {
        return message_response(StatusCode::BAD_REQUEST, "projectName is a required parameter.");
    };

    match project_work_items(state.tracker.as_ref(), &project).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => e.into_response(),
    }
}

// -----------------------------
// GET /api/projects/projects-work-items
// Every project with its work items, fetched concurrently
// -----------------------------
pub async fn get_projects_and_work_items(State(state): State<AppState>) -> impl IntoResponse {
    let projects = match state.tracker.projects().await {
        Ok(p) => p.value,
        Err(e) => return e.into_response(),
    };

    let mut tasks = JoinSet::new();
    for (index, project) in projects.into_iter().enumerate() {
        let tracker = state.tracker.clone();
        tasks.spawn(async move {
            let items = project_work_items(tracker.as_ref(), &project.name).await;
            (index, project, items)
        });
    }

    let mut collected = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, project, Ok(work_items))) => collected.push((
                index,
                ProjectWithWorkItems {
                    project: project.name,
                    id: project.id,
                    state: project.state,
                    work_items,
                },
            )),
            Ok((_, _, Err(e))) => return e.into_response(),
            Err(e) => return UpstreamError::from(e).into_response(),
        }
    }
    collected.sort_by_key(|(index, _)| *index);

    let body: Vec<ProjectWithWorkItems> = collected.into_iter().map(|(_, p)| p).collect();
    Json(body).into_response()
}

// -----------------------------
// GET /api/projects/:projectId/work-items
// -----------------------------
pub async fn get_project_work_items_by_id(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> impl IntoResponse {
    let project = match state.tracker.project(&project_id).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    match project_work_items(state.tracker.as_ref(), &project.name).await {
        Ok(work_items) => Json(ProjectByIdResponse {
            project: ProjectSummary {
                name: project.name,
                id: project.id,
                state: project.state,
            },
            work_items,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
