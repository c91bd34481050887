//! Fetch Google Cloud resources into relational tables.
//!
//! Every configured table is fetched for every resolved project. List calls
//! are paginated and retried, embedded arrays fan out into child tables, and
//! rows are written onto bounded per-table channels drained by a [`sink`].

pub mod config;
pub mod error;
pub mod gcp;
pub mod pipeline;
pub mod resource;
pub mod sink;

/// Version injected at compile time via GCP_FETCH_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("GCP_FETCH_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
