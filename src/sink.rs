//! JSON Lines Sink
//!
//! Drains every table channel and writes one JSON object per row, either to
//! stdout or to `<dir>/<table>.jsonl`. Rows are projected onto the table's
//! columns with each value normalised to its column kind.

use crate::resource::path::lookup;
use crate::resource::{get_columns, ColumnDef, ColumnKind, Row, TableReceiver};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Where rows go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// `{"table": "...", "row": {...}}` per line on stdout
    Stdout,
    /// One `<table>.jsonl` file per table, a bare row object per line
    Directory(PathBuf),
}

/// Rows written per table
pub type SinkStats = BTreeMap<String, usize>;

/// Row projected onto `columns`, with the generated keys first
pub fn project_row(row: &Row, columns: &[ColumnDef]) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("cq_id".to_string(), Value::String(row.cq_id.to_string()));
    if let Some(parent) = row.parent_cq_id {
        out.insert(
            "parent_cq_id".to_string(),
            Value::String(parent.to_string()),
        );
    }
    for column in columns {
        out.insert(column.name.clone(), column_value(row, column));
    }
    out
}

fn column_value(row: &Row, column: &ColumnDef) -> Value {
    let raw = if column.path == "$project" {
        Some(Value::String(row.project_id.clone()))
    } else if let Some(path) = column.path.strip_prefix("$parent.") {
        row.parent
            .as_deref()
            .and_then(|parent| lookup(parent, path))
            .cloned()
    } else {
        lookup(&row.item, &column.path).cloned()
    };

    raw.map(|value| coerce(value, column.kind))
        .unwrap_or(Value::Null)
}

/// Normalise a raw API value to a column kind. Values that do not fit become null.
pub fn coerce(value: Value, kind: ColumnKind) -> Value {
    match kind {
        ColumnKind::Json => value,
        ColumnKind::String => match value {
            Value::String(_) | Value::Null => value,
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => Value::String(other.to_string()),
        },
        ColumnKind::Int => match value {
            Value::Number(ref n) if n.is_i64() || n.is_u64() => value,
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        ColumnKind::Bool => match value {
            Value::Bool(_) => value,
            Value::String(s) => match s.as_str() {
                "true" | "TRUE" | "True" => Value::Bool(true),
                "false" | "FALSE" | "False" => Value::Bool(false),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ColumnKind::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| {
                Value::String(
                    t.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                )
            })
            .unwrap_or(Value::Null),
    }
}

/// Drain one table's channel into `writer`. With `envelope`, each line wraps
/// the row as `{"table": ..., "row": ...}`.
pub async fn write_table<W>(
    receiver: TableReceiver,
    writer: &mut W,
    envelope: bool,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let TableReceiver { table, mut rx } = receiver;
    let columns = get_columns(&table).unwrap_or(&[]);
    let mut count = 0;

    while let Some(row) = rx.recv().await {
        let line = encode_line(&table, &row, columns, envelope)?;
        writer.write_all(line.as_bytes()).await?;
        count += 1;
    }
    writer.flush().await?;
    Ok(count)
}

fn encode_line(table: &str, row: &Row, columns: &[ColumnDef], envelope: bool) -> Result<String> {
    let projected = Value::Object(project_row(row, columns));
    let mut line = if envelope {
        serde_json::to_string(&json!({ "table": table, "row": projected }))?
    } else {
        serde_json::to_string(&projected)?
    };
    line.push('\n');
    Ok(line)
}

pub struct JsonLinesSink {
    target: SinkTarget,
}

impl JsonLinesSink {
    pub fn new(target: SinkTarget) -> Self {
        Self { target }
    }

    /// Start draining every receiver. The task finishes once all senders are
    /// dropped.
    pub fn spawn(self, receivers: Vec<TableReceiver>) -> JoinHandle<Result<SinkStats>> {
        tokio::spawn(async move { self.drain(receivers).await })
    }

    async fn drain(self, receivers: Vec<TableReceiver>) -> Result<SinkStats> {
        let counts = match &self.target {
            SinkTarget::Directory(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                try_join_all(receivers.into_iter().map(|r| drain_to_file(dir, r))).await?
            }
            SinkTarget::Stdout => {
                let stdout = Mutex::new(BufWriter::new(tokio::io::stdout()));
                let counts =
                    try_join_all(receivers.into_iter().map(|r| drain_to_shared(&stdout, r)))
                        .await?;
                stdout.lock().await.flush().await?;
                counts
            }
        };

        for (table, rows) in counts.iter().filter(|(_, rows)| *rows > 0) {
            tracing::info!("Wrote {} rows to {}", rows, table);
        }
        Ok(counts.into_iter().collect())
    }
}

async fn drain_to_file(dir: &std::path::Path, receiver: TableReceiver) -> Result<(String, usize)> {
    let table = receiver.table.clone();
    let path = dir.join(format!("{}.jsonl", table));
    let file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let count = write_table(receiver, &mut writer, false).await?;
    Ok((table, count))
}

async fn drain_to_shared<W>(out: &Mutex<W>, receiver: TableReceiver) -> Result<(String, usize)>
where
    W: AsyncWrite + Unpin,
{
    let TableReceiver { table, mut rx } = receiver;
    let columns = get_columns(&table).unwrap_or(&[]);
    let mut count = 0;

    while let Some(row) = rx.recv().await {
        let line = encode_line(&table, &row, columns, true)?;
        out.lock().await.write_all(line.as_bytes()).await?;
        count += 1;
    }
    Ok((table, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{get_table, Outputs};
    use std::sync::Arc;
    use uuid::Uuid;

    fn column(name: &str, path: &str, kind: ColumnKind) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            path: path.to_string(),
            kind,
            description: None,
        }
    }

    fn row(item: Value, parent: Option<Value>) -> Row {
        Row {
            table: "t".to_string(),
            cq_id: Uuid::nil(),
            parent_cq_id: parent.as_ref().map(|_| Uuid::nil()),
            project_id: "alpha-project".to_string(),
            item,
            parent: parent.map(Arc::new),
        }
    }

    #[test]
    fn test_coerce_kinds() {
        assert_eq!(coerce(json!(12), ColumnKind::String), json!("12"));
        assert_eq!(coerce(json!("10"), ColumnKind::Int), json!(10));
        assert_eq!(coerce(json!("ten"), ColumnKind::Int), Value::Null);
        assert_eq!(coerce(json!("true"), ColumnKind::Bool), json!(true));
        assert_eq!(coerce(json!({"a": 1}), ColumnKind::Json), json!({"a": 1}));
        assert_eq!(
            coerce(json!("2023-01-15T10:30:00.000-08:00"), ColumnKind::Timestamp),
            json!("2023-01-15T18:30:00.000Z")
        );
        assert_eq!(coerce(json!("yesterday"), ColumnKind::Timestamp), Value::Null);
    }

    #[test]
    fn test_project_row_resolves_special_paths() {
        let columns = vec![
            column("project_id", "$project", ColumnKind::String),
            column("gateway_id", "$parent.id", ColumnKind::String),
            column("ip", "ipAddress", ColumnKind::String),
            column("missing", "nope.deeper", ColumnKind::String),
        ];
        let projected = project_row(
            &row(json!({"ipAddress": "10.0.0.1"}), Some(json!({"id": "42"}))),
            &columns,
        );

        assert_eq!(projected["cq_id"], json!(Uuid::nil().to_string()));
        assert_eq!(projected["parent_cq_id"], json!(Uuid::nil().to_string()));
        assert_eq!(projected["project_id"], json!("alpha-project"));
        assert_eq!(projected["gateway_id"], json!("42"));
        assert_eq!(projected["ip"], json!("10.0.0.1"));
        assert_eq!(projected["missing"], Value::Null);
        let keys: Vec<&String> = projected.keys().collect();
        assert_eq!(keys[0], "cq_id");
    }

    #[test]
    fn test_top_level_row_has_no_parent_key() {
        let projected = project_row(&row(json!({}), None), &[]);
        assert!(!projected.contains_key("parent_cq_id"));
    }

    #[tokio::test]
    async fn test_write_table_lines() {
        let table = get_table("gcp_compute_addresses").unwrap();
        let (outputs, mut receivers) = Outputs::for_tables(&[table], 4);
        let receiver = receivers.remove(0);

        for id in ["1", "2"] {
            outputs
                .send(Row {
                    table: table.name.clone(),
                    cq_id: Uuid::new_v4(),
                    parent_cq_id: None,
                    project_id: "alpha-project".to_string(),
                    item: json!({"id": id, "prefixLength": 24}),
                    parent: None,
                })
                .await
                .unwrap();
        }
        drop(outputs);

        let mut buffer: Vec<u8> = Vec::new();
        let count = write_table(receiver, &mut buffer, true).await.unwrap();
        assert_eq!(count, 2);

        let lines: Vec<Value> = String::from_utf8(buffer)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["table"], json!("gcp_compute_addresses"));
        assert_eq!(lines[0]["row"]["id"], json!("1"));
        assert_eq!(lines[1]["row"]["prefix_length"], json!(24));
    }

    #[tokio::test]
    async fn test_directory_sink_writes_one_file_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = get_table("gcp_compute_vpn_gateways").unwrap();
        let (outputs, receivers) = Outputs::for_tables(&[table], 4);

        let handle = JsonLinesSink::new(SinkTarget::Directory(dir.path().to_path_buf()))
            .spawn(receivers);
        outputs
            .send(Row {
                table: table.name.clone(),
                cq_id: Uuid::new_v4(),
                parent_cq_id: None,
                project_id: "alpha-project".to_string(),
                item: json!({"id": "7", "name": "gw"}),
                parent: None,
            })
            .await
            .unwrap();
        drop(outputs);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats["gcp_compute_vpn_gateways"], 1);
        assert_eq!(stats["gcp_compute_vpn_gateway_vpn_interfaces"], 0);

        let content =
            std::fs::read_to_string(dir.path().join("gcp_compute_vpn_gateways.jsonl")).unwrap();
        let row: Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(row["name"], json!("gw"));
        assert_eq!(row["project_id"], json!("alpha-project"));
        assert!(dir
            .path()
            .join("gcp_compute_vpn_gateway_vpn_interfaces.jsonl")
            .exists());
    }
}
