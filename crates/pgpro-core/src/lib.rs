//! # pgpro-core
//!
//! Shared types for the pg_pro Postgres proxy.
//!
//! - [`config`]: process configuration (listener, data sources, cache, auth)
//! - [`access`]: per-statement table access descriptors produced by the classifier
//! - [`result`]: materialized query results as returned by upstream servers
//! - [`db_error`]: structured upstream errors carrying every SQLSTATE field

pub mod access;
pub mod config;
pub mod db_error;
pub mod result;

pub use access::{AccessMode, TableAccessInfo, DEFAULT_SCHEMA};
pub use config::{ConfigError, PgProConfig};
pub use db_error::DbError;
pub use result::{DataRow, FieldDescriptor, QueryResult};
