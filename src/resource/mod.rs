//! Resource fetch engine
//!
//! One generic engine fetches every table. A table is data: a [`TableDef`]
//! names the API call, where the items sit in the response and which embedded
//! arrays become child tables.
//!
//! # Architecture
//!
//! - [`registry`] - Loads table definitions from embedded JSON
//! - [`sdk_dispatch`] - Binds a table and a project to a REST list call
//! - [`fetcher`] - Follows page cursors and forwards each page's items
//! - [`emitter`] - Writes items as rows onto per-table channels
//! - [`relation`] - Emits child rows for arrays embedded in a parent
//! - [`classifier`] - Sorts failures into ignorable, retryable and fatal
//!
//! # Example
//!
//! ```ignore
//! let table = get_table("gcp_compute_vpn_gateways").unwrap();
//! let call = bind_list_call(&client, table, "my-project")?;
//! let mut emitter = Emitter::new(table, "my-project", &outputs);
//! paginator.run(&call, &mut emitter, &cancel).await?;
//! ```

pub mod classifier;
pub mod emitter;
pub mod fetcher;
pub mod path;
pub mod registry;
pub mod relation;
pub mod sdk_dispatch;

pub use classifier::{ErrorClass, ErrorClassifier, IgnorePolicy, ReasonIgnorePolicy};
pub use emitter::{EmitStats, Emitter, Outputs, Row, TableReceiver};
pub use fetcher::{ListCall, Page, PageSink, PageStats, Paginator};
pub use registry::*;
pub use sdk_dispatch::{bind_list_call, RestListCall};
