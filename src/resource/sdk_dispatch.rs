//! SDK Dispatch
//!
//! Binds a table definition and a project to a concrete REST list call.

use super::fetcher::{ListCall, Page};
use super::registry::{Enrichment, ResponseShape, TableDef};
use crate::error::Result;
use crate::gcp::client::GcpClient;
use async_trait::async_trait;
use serde_json::{json, Value};

/// A GET list call with an optional `pageToken`
pub struct RestListCall<'a> {
    client: &'a GcpClient,
    url: String,
    query: Vec<(String, String)>,
    shape: ResponseShape,
    enrich: Vec<Enrichment>,
}

impl<'a> RestListCall<'a> {
    pub fn new(client: &'a GcpClient, url: String, shape: ResponseShape) -> Self {
        Self {
            client,
            url,
            query: Vec::new(),
            shape,
            enrich: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_enrichments(mut self, enrich: &[Enrichment]) -> Self {
        self.enrich = enrich.to_vec();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn page_url(&self, cursor: &str) -> String {
        let mut query = self.query.clone();
        if !cursor.is_empty() {
            query.push(("pageToken".to_string(), cursor.to_string()));
        }
        add_query_params(&self.url, &query)
    }

    async fn enrich_item(&self, item: &mut Value) -> Result<()> {
        for enrichment in &self.enrich {
            match enrichment {
                Enrichment::IamPolicy => {
                    let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let url = self
                        .client
                        .service_url("resourcemanager", &format!("v3/{}:getIamPolicy", name))?;
                    let policy = self.client.post(&url, Some(&json!({}))).await?;
                    if let Some(map) = item.as_object_mut() {
                        map.insert("policy".to_string(), policy);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ListCall for RestListCall<'_> {
    async fn list(&self, cursor: &str) -> Result<Page> {
        let url = self.page_url(cursor);
        let response = self.client.get(&url).await?;
        let mut page = Page::decode(response, &self.shape);

        for item in page.items.iter_mut() {
            self.enrich_item(item).await?;
        }
        Ok(page)
    }
}

/// Bind `table` to `project_id`
pub fn bind_list_call<'a>(
    client: &'a GcpClient,
    table: &TableDef,
    project_id: &str,
) -> Result<RestListCall<'a>> {
    let path = table
        .path
        .replace("{project}", &urlencoding::encode(project_id));
    let url = client.service_url(&table.service, &path)?;

    let mut call = RestListCall::new(client, url, table.response.clone())
        .with_enrichments(&table.enrich);
    for (key, value) in &table.query {
        call = call.with_query(key, value);
    }
    Ok(call)
}

/// Append URL-encoded query parameters
fn add_query_params(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}
