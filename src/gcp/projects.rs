//! GCP Projects
//!
//! Resolves the projects a run iterates over.

use super::auth::{get_default_project, validate_project_id};
use super::client::GcpClient;
use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::resource::{Paginator, ResponseShape, RestListCall};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Project information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_number: String,
    pub lifecycle_state: String,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        let field = |key: &str, default: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            project_id: field("projectId", "-"),
            name: field("name", "-"),
            project_number: field("projectNumber", "-"),
            lifecycle_state: field("lifecycleState", "UNKNOWN"),
        }
    }
}

/// List every active project visible to the credentials, optionally narrowed
/// by a Resource Manager filter expression.
pub async fn list_projects(
    client: &GcpClient,
    paginator: &Paginator,
    filter: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<Project>> {
    let mut call = RestListCall::new(
        client,
        client.resourcemanager_projects_url()?,
        ResponseShape::List {
            items: "projects".to_string(),
        },
    );
    if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
        call = call.with_query("filter", filter);
    }

    let mut items: Vec<Value> = Vec::new();
    paginator.run(&call, &mut items, cancel).await?;

    Ok(items
        .iter()
        .map(Project::from)
        .filter(|p| p.lifecycle_state == "ACTIVE")
        .collect())
}

/// Projects to fetch: the explicit list when given, otherwise discovery. The
/// environment's default project is used only when an unfiltered discovery
/// finds nothing.
pub async fn resolve_projects(
    client: &GcpClient,
    paginator: &Paginator,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    resolve_projects_with(client, paginator, config, cancel, get_default_project).await
}

/// [`resolve_projects`] with the default-project lookup supplied by the caller
pub async fn resolve_projects_with<F>(
    client: &GcpClient,
    paginator: &Paginator,
    config: &Config,
    cancel: &CancellationToken,
    default_project: F,
) -> Result<Vec<String>>
where
    F: FnOnce() -> Option<String>,
{
    if !config.project_ids.is_empty() {
        for id in &config.project_ids {
            if !validate_project_id(id) {
                tracing::warn!("Project ID {:?} does not look like a GCP project ID", id);
            }
        }
        return Ok(config.project_ids.clone());
    }

    let filter = config
        .project_filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let projects = list_projects(client, paginator, filter, cancel).await?;
    if !projects.is_empty() {
        tracing::info!("Discovered {} projects", projects.len());
        return Ok(projects.into_iter().map(|p| p.project_id).collect());
    }

    if let Some(filter) = filter {
        return Err(FetchError::configuration(format!(
            "project_filter {:?} matched no active projects",
            filter
        )));
    }

    match default_project() {
        Some(project) => {
            tracing::warn!("No projects returned, using default project {}", project);
            Ok(vec![project])
        }
        None => Err(FetchError::configuration(
            "no project_ids configured and no projects found for these credentials",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_from_json() {
        let project = Project::from(&json!({
            "projectId": "alpha-project",
            "name": "Alpha",
            "projectNumber": "1234",
            "lifecycleState": "ACTIVE"
        }));
        assert_eq!(project.project_id, "alpha-project");
        assert_eq!(project.project_number, "1234");
        assert_eq!(project.lifecycle_state, "ACTIVE");

        let partial = Project::from(&json!({"projectId": "beta-project"}));
        assert_eq!(partial.lifecycle_state, "UNKNOWN");
    }
}
