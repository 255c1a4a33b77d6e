use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::models::GraphUser;
use crate::upstream::Directory;

#[derive(Debug, Clone)]
pub struct UserProjects {
    pub user: GraphUser,
    /// Names of projects with a team the user belongs to, in listing order.
    pub projects: Vec<String>,
}

/// Find a user by mail address and the projects they are a team member of.
///
/// Projects are checked concurrently. A project whose teams cannot be read
/// counts as "not a member" and is logged.
pub async fn user_projects<D>(directory: Arc<D>, email: &str) -> Result<UserProjects, UpstreamError>
where
    D: Directory + ?Sized + 'static,
{
    let wanted = email.to_lowercase();
    let user = directory
        .graph_users()
        .await?
        .into_iter()
        .find(|u| {
            u.mail_address
                .as_deref()
                .is_some_and(|mail| mail.to_lowercase() == wanted)
        })
        .ok_or_else(|| UpstreamError::NotFound("User".to_string()))?;

    let projects = directory.projects().await?.value;
    let mut tasks = JoinSet::new();

    for (index, project) in projects.into_iter().enumerate() {
        let directory = Arc::clone(&directory);
        let display_name = user.display_name.clone();
        tasks.spawn(async move {
            let member = is_member(directory.as_ref(), project.id, &display_name).await;
            (index, project.name, member)
        });
    }

    let mut enrolled = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, name, Ok(true))) => enrolled.push((index, name)),
            Ok((_, _, Ok(false))) => {}
            Ok((_, name, Err(e))) => {
                warn!(project = %name, error = %e, "error checking membership");
            }
            Err(e) => warn!(error = %e, "membership task did not finish"),
        }
    }
    enrolled.sort_by_key(|(index, _)| *index);

    Ok(UserProjects {
        user,
        projects: enrolled.into_iter().map(|(_, name)| name).collect(),
    })
}

async fn is_member<D>(directory: &D, project_id: Uuid, display_name: &str) -> Result<bool, UpstreamError>
where
    D: Directory + ?Sized,
{
    for team in directory.project_teams(project_id).await? {
        let members = directory.team_members(project_id, &team.id).await?;
        if members
            .iter()
            .any(|m| m.identity.display_name == display_name)
        {
            return Ok(true);
        }
    }
    Ok(false)
}
