//! Table Registry - Load table definitions from JSON
//!
//! Every fetchable Google Cloud resource is described by a [`TableDef`] in
//! one of the embedded JSON files: which API call to bind, how to find items
//! in the response, the table's columns and its child relations.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Embedded table JSON files (compiled into the binary)
const TABLE_FILES: &[&str] = &[
    include_str!("../resources/compute.json"),
    include_str!("../resources/cloudfunctions.json"),
    include_str!("../resources/resourcemanager.json"),
];

/// How a column value is derived and normalised by the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    String,
    Int,
    Bool,
    Json,
    Timestamp,
}

/// Column definition from JSON
///
/// `path` is a dot path into the item, or one of the special forms
/// `$project` (the fetched project id) and `$parent.<path>` (a field of the
/// parent item, for relation tables).
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default)]
    pub description: Option<String>,
}

/// Where the resources live in a list response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseShape {
    /// `{"<items>": [...], "nextPageToken": "..."}`
    List { items: String },
    /// `{"items": {"zones/a": {"<scoped>": [...]}, ...}, "nextPageToken": "..."}`
    Aggregated { scoped: String },
    /// The response is the resource itself
    Single,
}

/// Extra calls made per fetched item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enrichment {
    /// Attach the resource's IAM policy as `policy`
    IamPolicy,
}

/// Child table built from an array embedded in the parent item
#[derive(Debug, Clone, Deserialize)]
pub struct RelationDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Dot path of the embedded array inside the parent
    pub path: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

/// Table definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    /// Filled from the map key when loading
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub service: String,
    /// Request path below the service endpoint; `{project}` is substituted
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    pub response: ResponseShape,
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub enrich: Vec<Enrichment>,
}

impl TableDef {
    /// This table's name followed by every relation table below it
    pub fn table_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        collect_relation_names(&self.relations, &mut names);
        names
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn collect_relation_names<'a>(relations: &'a [RelationDef], names: &mut Vec<&'a str>) {
    for relation in relations {
        names.push(relation.name.as_str());
        collect_relation_names(&relation.relations, names);
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
struct TableFile {
    #[serde(default)]
    tables: BTreeMap<String, TableDef>,
}

#[derive(Debug)]
pub struct Registry {
    tables: BTreeMap<String, TableDef>,
    /// Columns of every table and relation table, by name
    columns: HashMap<String, Vec<ColumnDef>>,
}

impl Registry {
    fn from_sources(sources: &[&str]) -> Result<Self, serde_json::Error> {
        let mut tables = BTreeMap::new();
        for content in sources {
            let file: TableFile = serde_json::from_str(content)?;
            for (name, mut def) in file.tables {
                def.name = name.clone();
                tables.insert(name, def);
            }
        }

        let mut columns = HashMap::new();
        for def in tables.values() {
            columns.insert(def.name.clone(), def.columns.clone());
            index_relation_columns(&def.relations, &mut columns);
        }

        Ok(Self { tables, columns })
    }
}

fn index_relation_columns(
    relations: &[RelationDef],
    columns: &mut HashMap<String, Vec<ColumnDef>>,
) {
    for relation in relations {
        columns.insert(relation.name.clone(), relation.columns.clone());
        index_relation_columns(&relation.relations, columns);
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the table registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::from_sources(TABLE_FILES)
            .unwrap_or_else(|e| panic!("Failed to parse embedded table JSON: {}", e))
    })
}

/// Get a top-level table definition by name
pub fn get_table(name: &str) -> Option<&'static TableDef> {
    get_registry().tables.get(name)
}

/// All top-level tables, sorted by name
pub fn all_tables() -> Vec<&'static TableDef> {
    get_registry().tables.values().collect()
}

/// Columns of a table or relation table
pub fn get_columns(name: &str) -> Option<&'static [ColumnDef]> {
    get_registry().columns.get(name).map(|c| c.as_slice())
}
