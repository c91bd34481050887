//! Resource Emitter
//!
//! Turns fetched items into [`Row`]s and writes them onto the bounded output
//! channel of their table. A full channel blocks the fetch loop.

use super::fetcher::PageSink;
use super::path::{key_string, lookup};
use super::registry::TableDef;
use super::relation::emit_relations;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One emitted resource or relation element
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table: String,
    /// Generated key of this row
    pub cq_id: Uuid,
    /// Generated key of the parent row, for relation tables
    pub parent_cq_id: Option<Uuid>,
    pub project_id: String,
    pub item: Value,
    /// The parent item, for relation tables
    pub parent: Option<Arc<Value>>,
}

/// Receiving end of one table's channel
#[derive(Debug)]
pub struct TableReceiver {
    pub table: String,
    pub rx: mpsc::Receiver<Row>,
}

/// Sending ends of every table's channel. Cheap to clone; each fetch holds
/// its own clone.
#[derive(Debug, Clone)]
pub struct Outputs {
    senders: Arc<HashMap<String, mpsc::Sender<Row>>>,
}

impl Outputs {
    /// One bounded channel per table and per relation table below it
    pub fn for_tables(tables: &[&TableDef], capacity: usize) -> (Self, Vec<TableReceiver>) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();

        for table in tables {
            for name in table.table_names() {
                if senders.contains_key(name) {
                    continue;
                }
                let (tx, rx) = mpsc::channel(capacity.max(1));
                senders.insert(name.to_string(), tx);
                receivers.push(TableReceiver {
                    table: name.to_string(),
                    rx,
                });
            }
        }

        (
            Self {
                senders: Arc::new(senders),
            },
            receivers,
        )
    }

    /// Write a row, waiting while the table's channel is full
    pub async fn send(&self, row: Row) -> Result<()> {
        let sender = self
            .senders
            .get(&row.table)
            .ok_or_else(|| FetchError::UnknownTable(row.table.clone()))?;
        let table = row.table.clone();
        sender
            .send(row)
            .await
            .map_err(|_| FetchError::ChannelClosed(table))
    }
}

/// Key of a top-level row: UUIDv5 over table, project and primary key values,
/// so identical responses produce identical keys. An item missing a key value
/// is keyed by its serialized form and its position in the fetch instead.
pub fn resource_id(table: &TableDef, project_id: &str, item: &Value, position: usize) -> Uuid {
    let mut name = format!("{}/{}", table.name, project_id);

    for key in &table.primary_keys {
        let value = table.column(key).and_then(|column| {
            if column.path == "$project" {
                Some(project_id.to_string())
            } else {
                lookup(item, &column.path).and_then(key_string)
            }
        });
        match value {
            Some(v) => {
                name.push('/');
                name.push_str(&v);
            }
            None => return keyless_id(table, project_id, item, position),
        }
    }

    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn keyless_id(table: &TableDef, project_id: &str, item: &Value, position: usize) -> Uuid {
    let name = format!("{}/{}/#{}/{}", table.name, project_id, position, item);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub resources: usize,
    pub relations: usize,
}

/// Emits the items of one (project, table) fetch
pub struct Emitter<'a> {
    table: &'a TableDef,
    project_id: &'a str,
    outputs: &'a Outputs,
    stats: EmitStats,
}

impl<'a> Emitter<'a> {
    pub fn new(table: &'a TableDef, project_id: &'a str, outputs: &'a Outputs) -> Self {
        Self {
            table,
            project_id,
            outputs,
            stats: EmitStats::default(),
        }
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    /// Emit one resource, then its relations
    pub async fn emit(&mut self, item: Value) -> Result<()> {
        let cq_id = resource_id(self.table, self.project_id, &item, self.stats.resources);
        let parent = (!self.table.relations.is_empty()).then(|| Arc::new(item.clone()));

        self.outputs
            .send(Row {
                table: self.table.name.clone(),
                cq_id,
                parent_cq_id: None,
                project_id: self.project_id.to_string(),
                item,
                parent: None,
            })
            .await?;
        self.stats.resources += 1;

        if let Some(parent) = parent {
            self.stats.relations += emit_relations(
                &self.table.relations,
                &parent,
                cq_id,
                self.project_id,
                self.outputs,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageSink for Emitter<'_> {
    async fn accept(&mut self, items: Vec<Value>) -> Result<()> {
        for item in items {
            self.emit(item).await?;
        }
        Ok(())
    }
}
