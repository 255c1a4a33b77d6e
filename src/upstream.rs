// --------------------------------------------------
// Azure DevOps REST client and the traits the rest of
// the crate talks to.
//
// Responsibilities:
// - Basic auth with a personal access token
// - Map HTTP / transport / decode failures to UpstreamError
// - Page through work item updates
// - Run blocking ureq calls off the async runtime
// --------------------------------------------------

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::models::{
    Collection, GraphUser, Project, Team, TeamMember, WiqlResult, WorkItem, WorkItemRef,
    WorkItemUpdate,
};

const API_VERSION: &str = "7.1";
const GRAPH_API_VERSION: &str = "7.1-preview.1";

/// Page size for `workItems/{id}/updates`.
const UPDATES_PAGE: usize = 200;

/// Upper bound of ids per `workitemsbatch` request.
const BATCH_LIMIT: usize = 200;

/// What time-in-state aggregation needs from the tracker.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    async fn project_work_items(&self, project: &str) -> Result<Vec<WorkItemRef>, UpstreamError>;

    async fn work_item_history(
        &self,
        project: &str,
        id: u64,
    ) -> Result<Vec<WorkItemUpdate>, UpstreamError>;
}

/// Projects, users and team membership.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn projects(&self) -> Result<Collection<Project>, UpstreamError>;

    async fn graph_users(&self) -> Result<Vec<GraphUser>, UpstreamError>;

    async fn project_teams(&self, project_id: Uuid) -> Result<Vec<Team>, UpstreamError>;

    async fn team_members(
        &self,
        project_id: Uuid,
        team_id: &str,
    ) -> Result<Vec<TeamMember>, UpstreamError>;
}

/// Everything the HTTP layer relays.
#[async_trait]
pub trait WorkTracker: WorkItemSource + Directory {
    async fn project(&self, project_id: &str) -> Result<Project, UpstreamError>;

    async fn work_items(&self, project: &str, ids: &str) -> Result<Value, UpstreamError>;

    async fn work_item_details(&self, ids: &[u64]) -> Result<Vec<WorkItem>, UpstreamError>;

    async fn task_revisions(&self, project: &str, task_id: u64) -> Result<Value, UpstreamError>;
}

#[derive(Clone)]
pub struct AzureDevOps {
    agent: ureq::Agent,
    org_url: Url,
    graph_url: Url,
    auth: String,
}

impl AzureDevOps {
    pub fn new(
        org_url: &str,
        graph_url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent("devops-relay")
            .build();

        Ok(Self {
            agent,
            org_url: base_url(org_url)?,
            graph_url: base_url(graph_url)?,
            auth: basic_auth(token),
        })
    }

    pub fn fetch_projects(&self) -> Result<Collection<Project>, UpstreamError> {
        let url = endpoint(&self.org_url, &["_apis", "projects"]);
        self.get_json(&url, &[], "Failed to fetch projects")
    }

    pub fn fetch_project(&self, project_id: &str) -> Result<Project, UpstreamError> {
        let url = endpoint(&self.org_url, &["_apis", "projects", project_id]);
        match self.get_json(&url, &[], "Failed to fetch project") {
            Err(UpstreamError::Status { status: 404, .. }) => {
                Err(UpstreamError::NotFound(format!("project {project_id}")))
            }
            other => other,
        }
    }

    pub fn fetch_work_items(&self, project: &str, ids: &str) -> Result<Value, UpstreamError> {
        let url = endpoint(&self.org_url, &[project, "_apis", "wit", "workitems"]);
        self.get_json(&url, &[("ids", ids)], "Failed to fetch work items")
    }

    /// Every update of one work item, following `$skip` pages.
    pub fn fetch_history(&self, project: &str, id: u64) -> Result<Vec<WorkItemUpdate>, UpstreamError> {
        let item = id.to_string();
        let url = endpoint(
            &self.org_url,
            &[project, "_apis", "wit", "workItems", &item, "updates"],
        );
        let top = UPDATES_PAGE.to_string();
        let mut updates: Vec<WorkItemUpdate> = Vec::new();

        loop {
            let skip = updates.len().to_string();
            let page: Collection<WorkItemUpdate> = self.get_json(
                &url,
                &[("$top", top.as_str()), ("$skip", skip.as_str())],
                "Failed to fetch work item history",
            )?;

            let raw_len = page.value.len();
            updates.extend(page.value);

            if raw_len < UPDATES_PAGE {
                break;
            }
        }

        debug!(project, work_item_id = id, updates = updates.len(), "fetched history");
        Ok(updates)
    }

    /// Ids of every work item in a project, via WIQL.
    pub fn query_project_items(&self, project: &str) -> Result<Vec<WorkItemRef>, UpstreamError> {
        let url = endpoint(&self.org_url, &[project, "_apis", "wit", "wiql"]);
        let body = json!({ "query": project_wiql(project) });
        let result: WiqlResult = self.post_json(&url, &body, "Failed to query work items")?;
        Ok(result.work_items)
    }

    pub fn fetch_details(&self, ids: &[u64]) -> Result<Vec<WorkItem>, UpstreamError> {
        let url = endpoint(&self.org_url, &["_apis", "wit", "workitemsbatch"]);
        let mut items = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(BATCH_LIMIT) {
            let body = json!({ "ids": chunk, "$expand": "all" });
            let batch: Collection<WorkItem> =
                self.post_json(&url, &body, "Failed to fetch work item details")?;
            items.extend(batch.value);
        }

        Ok(items)
    }

    pub fn fetch_revisions(&self, project: &str, task_id: u64) -> Result<Value, UpstreamError> {
        let task = task_id.to_string();
        let url = endpoint(
            &self.org_url,
            &[project, "_apis", "wit", "workitems", &task, "revisions"],
        );
        self.get_json(&url, &[], "Error fetching activities")
    }

    pub fn fetch_graph_users(&self) -> Result<Vec<GraphUser>, UpstreamError> {
        let url = endpoint(&self.graph_url, &["_apis", "graph", "users"]);
        let request = self
            .agent
            .get(&url)
            .query("api-version", GRAPH_API_VERSION);
        let users: Collection<GraphUser> = self.call(request, None, "Failed to fetch users")?;
        Ok(users.value)
    }

    pub fn fetch_teams(&self, project_id: Uuid) -> Result<Vec<Team>, UpstreamError> {
        let project = project_id.to_string();
        let url = endpoint(&self.org_url, &["_apis", "projects", &project, "teams"]);
        let teams: Collection<Team> = self.get_json(&url, &[], "Failed to fetch teams")?;
        Ok(teams.value)
    }

    pub fn fetch_team_members(
        &self,
        project_id: Uuid,
        team_id: &str,
    ) -> Result<Vec<TeamMember>, UpstreamError> {
        let project = project_id.to_string();
        let url = endpoint(
            &self.org_url,
            &["_apis", "projects", &project, "teams", team_id, "members"],
        );
        let members: Collection<TeamMember> =
            self.get_json(&url, &[], "Failed to fetch team members")?;
        Ok(members.value)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<T, UpstreamError> {
        let mut request = self.agent.get(url).query("api-version", API_VERSION);
        for (k, v) in query {
            request = request.query(k, v);
        }
        self.call(request, None, context)
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
        context: &str,
    ) -> Result<T, UpstreamError> {
        let request = self.agent.post(url).query("api-version", API_VERSION);
        self.call(request, Some(body), context)
    }

    fn call<T: DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: Option<&Value>,
        context: &str,
    ) -> Result<T, UpstreamError> {
        let request = request
            .set("Authorization", &self.auth)
            .set("Accept", "application/json");

        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let status_text = response.status_text().to_string();
                let details = response.into_string().unwrap_or_default();
                error!(status, %details, "{context}");
                return Err(UpstreamError::Status {
                    context: context.to_string(),
                    status,
                    status_text,
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                error!(error = %transport, "{context}: no response received");
                return Err(UpstreamError::Transport {
                    context: context.to_string(),
                    reason: transport.to_string(),
                });
            }
        };

        response.into_json::<T>().map_err(|e| UpstreamError::Decode {
            context: context.to_string(),
            reason: e.to_string(),
        })
    }

    // ureq blocks; keep it off the async workers
    async fn blocking<T, F>(&self, f: F) -> Result<T, UpstreamError>
    where
        F: FnOnce(&AzureDevOps) -> Result<T, UpstreamError> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || f(&client)).await?
    }
}

#[async_trait]
impl WorkItemSource for AzureDevOps {
    async fn project_work_items(&self, project: &str) -> Result<Vec<WorkItemRef>, UpstreamError> {
        let project = project.to_string();
        self.blocking(move |c| c.query_project_items(&project)).await
    }

    async fn work_item_history(
        &self,
        project: &str,
        id: u64,
    ) -> Result<Vec<WorkItemUpdate>, UpstreamError> {
        let project = project.to_string();
        self.blocking(move |c| c.fetch_history(&project, id)).await
    }
}

#[async_trait]
impl Directory for AzureDevOps {
    async fn projects(&self) -> Result<Collection<Project>, UpstreamError> {
        self.blocking(|c| c.fetch_projects()).await
    }

    async fn graph_users(&self) -> Result<Vec<GraphUser>, UpstreamError> {
        self.blocking(|c| c.fetch_graph_users()).await
    }

    async fn project_teams(&self, project_id: Uuid) -> Result<Vec<Team>, UpstreamError> {
        self.blocking(move |c| c.fetch_teams(project_id)).await
    }

    async fn team_members(
        &self,
        project_id: Uuid,
        team_id: &str,
    ) -> Result<Vec<TeamMember>, UpstreamError> {
        let team_id = team_id.to_string();
        self.blocking(move |c| c.fetch_team_members(project_id, &team_id))
            .await
    }
}

#[async_trait]
impl WorkTracker for AzureDevOps {
    async fn project(&self, project_id: &str) -> Result<Project, UpstreamError> {
        let project_id = project_id.to_string();
        self.blocking(move |c| c.fetch_project(&project_id)).await
    }

    async fn work_items(&self, project: &str, ids: &str) -> Result<Value, UpstreamError> {
        let (project, ids) = (project.to_string(), ids.to_string());
        self.blocking(move |c| c.fetch_work_items(&project, &ids))
            .await
    }

    async fn work_item_details(&self, ids: &[u64]) -> Result<Vec<WorkItem>, UpstreamError> {
        let ids = ids.to_vec();
        self.blocking(move |c| c.fetch_details(&ids)).await
    }

    async fn task_revisions(&self, project: &str, task_id: u64) -> Result<Value, UpstreamError> {
        let project = project.to_string();
        self.blocking(move |c| c.fetch_revisions(&project, task_id))
            .await
    }
}

fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{token}")))
}

// WIQL string literals escape a quote by doubling it.
fn project_wiql(project: &str) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{}'",
        project.replace('\'', "''")
    )
}

fn base_url(raw: &str) -> Result<Url, UpstreamError> {
    let invalid = |reason: String| UpstreamError::BaseUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("not a hierarchical url".to_string()));
    }
    Ok(url)
}

// Base url plus path segments, each percent-encoded on its own.
fn endpoint(base: &Url, segments: &[&str]) -> String {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url.to_string()
}
