//! Remote data access.
//!
//! This module provides the `CurriculumSource` trait the cache reads through,
//! the `{success, data, error}` response envelope, and `ApiClient`, the HTTP
//! implementation used against the real backend.

pub mod client;
pub mod error;
pub mod source;

pub use client::ApiClient;
pub use error::ApiError;
pub use source::{CurriculumSource, RemoteResponse};
