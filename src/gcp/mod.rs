//! GCP API interaction module
//!
//! This module provides the core functionality for interacting with Google Cloud Platform
//! APIs, including authentication, HTTP client, retries and project resolution.
//!
//! # Module Structure
//!
//! - [`auth`] - Credentials from a service account key, ADC or a static token
//! - [`client`] - Main GCP client and service endpoints
//! - [`http`] - HTTP utilities for REST API calls
//! - [`retry`] - Bounded retries with exponential backoff
//! - [`projects`] - Project listing and resolution

pub mod auth;
pub mod client;
pub mod http;
pub mod projects;
pub mod retry;
