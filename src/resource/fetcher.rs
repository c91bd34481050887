//! Paginated Fetcher
//!
//! Drives any [`ListCall`] page by page, following `nextPageToken` until the
//! API returns an empty cursor, and hands each page's items to a [`PageSink`].

use super::registry::ResponseShape;
use crate::error::{FetchError, Result};
use crate::gcp::retry::Retrier;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One decoded API response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Empty when there are no more pages
    pub next_page_token: String,
}

impl Page {
    pub fn new(items: Vec<Value>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: next_page_token.into(),
        }
    }

    /// Extract items and cursor from a raw response
    pub fn decode(response: Value, shape: &ResponseShape) -> Self {
        let next_page_token = response
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let items = match shape {
            ResponseShape::Single => match response {
                Value::Null => Vec::new(),
                item => vec![item],
            },
            ResponseShape::List { items } => take_array(response, items),
            ResponseShape::Aggregated { scoped } => flatten_aggregated(response, scoped),
        };

        Self {
            items,
            next_page_token,
        }
    }
}

fn take_array(mut response: Value, field: &str) -> Vec<Value> {
    match response.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Flatten an aggregated list response:
/// ```json
/// {"items": {"zones/us-central1-a": {"instances": [...]},
///            "zones/us-east1-b": {"warning": {...}}}}
/// ```
/// Buckets are visited in response order; items within a bucket keep their order.
fn flatten_aggregated(mut response: Value, scoped: &str) -> Vec<Value> {
    let Some(Value::Object(buckets)) = response.get_mut("items").map(Value::take) else {
        return Vec::new();
    };

    let mut all_items = Vec::new();
    for (_scope, bucket) in buckets {
        all_items.extend(take_array(bucket, scoped));
    }
    all_items
}

/// A list operation bound to everything but the page cursor
#[async_trait]
pub trait ListCall: Send + Sync {
    /// Fetch the page at `cursor` (`""` for the first page)
    async fn list(&self, cursor: &str) -> Result<Page>;
}

/// Receives each page's items, in order
#[async_trait]
pub trait PageSink: Send {
    async fn accept(&mut self, items: Vec<Value>) -> Result<()>;
}

/// Collects items in memory
#[async_trait]
impl PageSink for Vec<Value> {
    async fn accept(&mut self, items: Vec<Value>) -> Result<()> {
        self.extend(items);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub pages: usize,
    pub items: usize,
}

#[derive(Debug, Clone)]
pub struct Paginator {
    retrier: Retrier,
}

impl Paginator {
    pub fn new(retrier: Retrier) -> Self {
        Self { retrier }
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Fetch every page of `call` into `sink`. Page N+1 is requested only after
    /// page N has been accepted.
    pub async fn run<S>(
        &self,
        call: &dyn ListCall,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<PageStats>
    where
        S: PageSink + ?Sized,
    {
        let mut stats = PageStats::default();
        let mut cursor = String::new();

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let page = self.retrier.run(cancel, || call.list(&cursor)).await?;
            stats.pages += 1;
            stats.items += page.items.len();
            tracing::trace!(
                "page {} with {} items, next cursor {:?}",
                stats.pages,
                page.items.len(),
                page.next_page_token
            );

            sink.accept(page.items).await?;

            if page.next_page_token.is_empty() {
                return Ok(stats);
            }
            cursor = page.next_page_token;
        }
    }
}
