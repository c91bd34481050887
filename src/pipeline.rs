//! Fetch Pipeline
//!
//! Runs one fetch per (project, table) pair with bounded concurrency. Each
//! pair ends in exactly one [`FetchStatus`]; a failing pair never stops the
//! others.

use crate::config::Config;
use crate::error::FetchError;
use crate::gcp::client::GcpClient;
use crate::gcp::retry::Retrier;
use crate::resource::{
    bind_list_call, EmitStats, Emitter, ErrorClass, ErrorClassifier, IgnorePolicy, Outputs,
    Paginator, ReasonIgnorePolicy, TableDef,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug)]
pub enum FetchStatus {
    Completed {
        pages: usize,
        resources: usize,
        relations: usize,
    },
    /// The API reported an ignorable error, e.g. it is disabled for the project
    Skipped { reason: String },
    Failed(FetchError),
    Cancelled,
}

#[derive(Debug)]
pub struct TableOutcome {
    pub project_id: String,
    pub table: String,
    pub status: FetchStatus,
}

impl TableOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FetchStatus::Failed(_))
    }
}

/// Outcomes of a run, sorted by project then table
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TableOutcome>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &TableOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FetchStatus::Skipped { .. }))
            .count()
    }

    /// Total (resources, relation rows) emitted
    pub fn rows(&self) -> (usize, usize) {
        self.outcomes.iter().fold((0, 0), |(r, c), o| match o.status {
            FetchStatus::Completed {
                resources,
                relations,
                ..
            } => (r + resources, c + relations),
            _ => (r, c),
        })
    }

    pub fn outcome(&self, project_id: &str, table: &str) -> Option<&TableOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.project_id == project_id && o.table == table)
    }
}

pub struct Pipeline {
    client: GcpClient,
    paginator: Paginator,
    outputs: Outputs,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        client: GcpClient,
        paginator: Paginator,
        outputs: Outputs,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            paginator,
            outputs,
            concurrency: concurrency.max(1),
        }
    }

    /// Pipeline with the retry budget, ignore reasons and concurrency of `config`
    pub fn from_config(client: GcpClient, config: &Config, outputs: Outputs) -> Self {
        Self::new(client, config_paginator(config), outputs, config.concurrency)
    }

    pub fn client(&self) -> &GcpClient {
        &self.client
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    fn classifier(&self) -> &ErrorClassifier {
        self.paginator.retrier().classifier()
    }

    /// Fetch one table for one project
    pub async fn fetch_table(
        &self,
        project_id: &str,
        table: &TableDef,
        cancel: &CancellationToken,
    ) -> TableOutcome {
        let span = tracing::info_span!("fetch", table = %table.name, project = %project_id);
        let status = self
            .fetch_table_status(project_id, table, cancel)
            .instrument(span)
            .await;

        TableOutcome {
            project_id: project_id.to_string(),
            table: table.name.clone(),
            status,
        }
    }

    async fn fetch_table_status(
        &self,
        project_id: &str,
        table: &TableDef,
        cancel: &CancellationToken,
    ) -> FetchStatus {
        let mut emitter = Emitter::new(table, project_id, &self.outputs);
        let result = match bind_list_call(&self.client, table, project_id) {
            Ok(call) => self.paginator.run(&call, &mut emitter, cancel).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(pages) => {
                let EmitStats {
                    resources,
                    relations,
                } = emitter.stats();
                tracing::debug!(
                    "Fetched {} resources and {} relation rows in {} pages",
                    resources,
                    relations,
                    pages.pages
                );
                FetchStatus::Completed {
                    pages: pages.pages,
                    resources,
                    relations,
                }
            }
            Err(err) if err.is_cancelled() => {
                tracing::debug!("Fetch cancelled");
                FetchStatus::Cancelled
            }
            Err(err) => match self.classifier().classify(&err) {
                ErrorClass::Ignorable => {
                    tracing::warn!("Skipping {} for project {}: {}", table.name, project_id, err);
                    FetchStatus::Skipped {
                        reason: err.to_string(),
                    }
                }
                ErrorClass::Retryable | ErrorClass::Fatal => {
                    tracing::error!(
                        "Failed to fetch {} for project {}: {}",
                        table.name,
                        project_id,
                        err
                    );
                    FetchStatus::Failed(err)
                }
            },
        }
    }

    /// Fetch every table for every project
    pub async fn run(
        &self,
        projects: &[String],
        tables: &[&TableDef],
        cancel: &CancellationToken,
    ) -> RunSummary {
        tracing::info!(
            "Fetching {} tables for {} projects (concurrency {})",
            tables.len(),
            projects.len(),
            self.concurrency
        );

        let jobs = projects
            .iter()
            .flat_map(|project| tables.iter().map(move |table| (project.as_str(), *table)));

        let mut outcomes: Vec<TableOutcome> = stream::iter(jobs)
            .map(|(project, table)| self.fetch_table(project, table, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        outcomes.sort_by(|a, b| {
            (a.project_id.as_str(), a.table.as_str())
                .cmp(&(b.project_id.as_str(), b.table.as_str()))
        });

        RunSummary { outcomes }
    }
}

/// Paginator with the config's retry budget and ignore reasons
pub fn config_paginator(config: &Config) -> Paginator {
    let policy: Arc<dyn IgnorePolicy> =
        Arc::new(ReasonIgnorePolicy::with_defaults(&config.ignore_error_reasons));
    Paginator::new(Retrier::new(config.retry.clone(), ErrorClassifier::new(policy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(project: &str, table: &str, status: FetchStatus) -> TableOutcome {
        TableOutcome {
            project_id: project.to_string(),
            table: table.to_string(),
            status,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            outcomes: vec![
                outcome(
                    "alpha-project",
                    "gcp_compute_addresses",
                    FetchStatus::Completed {
                        pages: 2,
                        resources: 3,
                        relations: 0,
                    },
                ),
                outcome(
                    "alpha-project",
                    "gcp_compute_vpn_gateways",
                    FetchStatus::Completed {
                        pages: 1,
                        resources: 1,
                        relations: 2,
                    },
                ),
                outcome(
                    "beta-project",
                    "gcp_compute_addresses",
                    FetchStatus::Skipped {
                        reason: "SERVICE_DISABLED".to_string(),
                    },
                ),
                outcome("beta-project", "gcp_compute_vpn_gateways", FetchStatus::Cancelled),
            ],
        };

        assert_eq!(summary.rows(), (4, 2));
        assert_eq!(summary.skipped(), 1);
        assert!(!summary.has_failures());
        assert!(summary
            .outcome("beta-project", "gcp_compute_vpn_gateways")
            .is_some());
    }

    #[test]
    fn test_failed_outcome_marks_summary() {
        let summary = RunSummary {
            outcomes: vec![outcome(
                "alpha-project",
                "gcp_cloudfunctions_functions",
                FetchStatus::Failed(FetchError::configuration("boom")),
            )],
        };
        assert!(summary.has_failures());
        assert_eq!(summary.failures().count(), 1);
    }
}
