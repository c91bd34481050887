//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality. Holds no project: every call names its project in
//! the URL, so one client is shared by all concurrent fetches.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";
const CLOUDFUNCTIONS_ENDPOINT: &str = "https://cloudfunctions.googleapis.com/v1";
const RESOURCEMANAGER_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com";

/// Base URLs of the services tables are bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub compute: String,
    pub cloudfunctions: String,
    pub resourcemanager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: COMPUTE_ENDPOINT.to_string(),
            cloudfunctions: CLOUDFUNCTIONS_ENDPOINT.to_string(),
            resourcemanager: RESOURCEMANAGER_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every service at the same base URL (emulators, mock servers)
    pub fn all(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            compute: base.clone(),
            cloudfunctions: base.clone(),
            resourcemanager: base,
        }
    }

    /// Base URL for a service name as used in table definitions
    pub fn base_for(&self, service: &str) -> Result<&str> {
        match service {
            "compute" => Ok(&self.compute),
            "cloudfunctions" => Ok(&self.cloudfunctions),
            "resourcemanager" => Ok(&self.resourcemanager),
            _ => Err(FetchError::configuration(format!(
                "unknown service `{}`",
                service
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, base) in [
            ("compute", &self.compute),
            ("cloudfunctions", &self.cloudfunctions),
            ("resourcemanager", &self.resourcemanager),
        ] {
            url::Url::parse(base).map_err(|e| {
                FetchError::configuration(format!("invalid {} endpoint `{}`: {}", name, base, e))
            })?;
        }
        Ok(())
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub endpoints: Endpoints,
}

impl GcpClient {
    pub fn new(credentials: GcpCredentials, endpoints: Endpoints) -> Result<Self> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            endpoints,
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        match self.http.get(url, &token).await {
            Err(err) if is_unauthorized(&err) => {
                let token = self.refresh_after_unauthorized().await?;
                self.http.get(url, &token).await
            }
            result => result,
        }
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.get_token().await?;
        match self.http.post(url, &token, body).await {
            Err(err) if is_unauthorized(&err) => {
                let token = self.refresh_after_unauthorized().await?;
                self.http.post(url, &token, body).await
            }
            result => result,
        }
    }

    async fn refresh_after_unauthorized(&self) -> Result<String> {
        tracing::debug!("Access token rejected, refreshing");
        self.credentials.refresh_token().await
    }

    /// Build a URL below a service's base, e.g.
    /// `service_url("compute", "projects/p/aggregated/addresses")`
    pub fn service_url(&self, service: &str, path: &str) -> Result<String> {
        let base = self.endpoints.base_for(service)?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    /// Resource Manager v1 projects collection
    pub fn resourcemanager_projects_url(&self) -> Result<String> {
        self.service_url("resourcemanager", "v1/projects")
    }
}

fn is_unauthorized(error: &FetchError) -> bool {
    matches!(error, FetchError::Api(api) if api.status == reqwest::StatusCode::UNAUTHORIZED)
}
