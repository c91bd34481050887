//! Relation Extractor
//!
//! Child tables are arrays embedded in an already fetched parent item, such as
//! the `vpnInterfaces` of a VPN gateway. Each element becomes a child row that
//! references the parent by its generated key.

use super::emitter::{Outputs, Row};
use super::path::lookup;
use super::registry::RelationDef;
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Elements of the relation's embedded array. Absent, null or non-array
/// fields yield no elements.
pub fn extract_children<'a>(parent: &'a Value, relation: &RelationDef) -> &'a [Value] {
    match lookup(parent, &relation.path) {
        Some(Value::Array(children)) => children,
        _ => &[],
    }
}

/// Key of a child row, derived from its parent's key and position
pub fn child_id(parent_cq_id: Uuid, relation: &str, index: usize) -> Uuid {
    Uuid::new_v5(&parent_cq_id, format!("{}/{}", relation, index).as_bytes())
}

/// Emit every relation of `parent`, depth first. Must be called after the
/// parent row itself has been sent. Returns the number of child rows emitted.
pub fn emit_relations<'a>(
    relations: &'a [RelationDef],
    parent: &'a Arc<Value>,
    parent_cq_id: Uuid,
    project_id: &'a str,
    outputs: &'a Outputs,
) -> BoxFuture<'a, Result<usize>> {
    async move {
        let mut emitted = 0;

        for relation in relations {
            for (index, child) in extract_children(parent, relation).iter().enumerate() {
                let cq_id = child_id(parent_cq_id, &relation.name, index);
                let nested = (!relation.relations.is_empty()).then(|| Arc::new(child.clone()));

                outputs
                    .send(Row {
                        table: relation.name.clone(),
                        cq_id,
                        parent_cq_id: Some(parent_cq_id),
                        project_id: project_id.to_string(),
                        item: child.clone(),
                        parent: Some(Arc::clone(parent)),
                    })
                    .await?;
                emitted += 1;

                if let Some(nested) = nested {
                    emitted +=
                        emit_relations(&relation.relations, &nested, cq_id, project_id, outputs)
                            .await?;
                }
            }
        }

        Ok(emitted)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::get_table;
    use serde_json::json;

    #[test]
    fn test_extract_children_absent_or_empty() {
        let table = get_table("gcp_compute_vpn_gateways").unwrap();
        let relation = &table.relations[0];

        assert!(extract_children(&json!({"id": "1"}), relation).is_empty());
        assert!(extract_children(&json!({"vpnInterfaces": []}), relation).is_empty());
        assert!(extract_children(&json!({"vpnInterfaces": null}), relation).is_empty());
        assert!(extract_children(&json!({"vpnInterfaces": "oops"}), relation).is_empty());
        assert_eq!(
            extract_children(&json!({"vpnInterfaces": [{"id": 0}]}), relation).len(),
            1
        );
    }

    #[test]
    fn test_child_ids_are_stable_and_distinct() {
        let parent = Uuid::new_v4();
        assert_eq!(child_id(parent, "r", 0), child_id(parent, "r", 0));
        assert_ne!(child_id(parent, "r", 0), child_id(parent, "r", 1));
        assert_ne!(child_id(parent, "r", 0), child_id(Uuid::new_v4(), "r", 0));
    }

    #[tokio::test]
    async fn test_nested_relations_reference_their_parents() {
        let table = get_table("gcp_compute_instances").unwrap();
        let (outputs, mut receivers) = Outputs::for_tables(&[table], 16);
        let instance = Arc::new(json!({
            "id": "42",
            "networkInterfaces": [
                {"name": "nic0", "accessConfigs": [{"natIP": "1.1.1.1"}, {"natIP": "2.2.2.2"}]},
                {"name": "nic1"}
            ],
            "disks": [{"deviceName": "boot"}]
        }));
        let instance_id = Uuid::new_v4();

        let emitted = emit_relations(&table.relations, &instance, instance_id, "p", &outputs)
            .await
            .unwrap();
        assert_eq!(emitted, 5);

        let mut rows_by_table = std::collections::HashMap::new();
        for receiver in receivers.iter_mut() {
            let mut rows = Vec::new();
            while let Ok(row) = receiver.rx.try_recv() {
                rows.push(row);
            }
            rows_by_table.insert(receiver.table.clone(), rows);
        }

        let nics = &rows_by_table["gcp_compute_instance_network_interfaces"];
        let configs = &rows_by_table["gcp_compute_instance_network_interface_access_configs"];
        let disks = &rows_by_table["gcp_compute_instance_disks"];

        assert_eq!(nics.len(), 2);
        assert_eq!(disks.len(), 1);
        assert_eq!(configs.len(), 2);
        assert!(nics.iter().all(|r| r.parent_cq_id == Some(instance_id)));
        assert!(configs.iter().all(|r| r.parent_cq_id == Some(nics[0].cq_id)));
        assert_eq!(configs[0].parent.as_deref().unwrap()["name"], "nic0");
    }
}
