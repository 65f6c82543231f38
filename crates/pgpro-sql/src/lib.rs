//! # pgpro-sql
//!
//! Statement classification for routing and access control.
//!
//! [`QueryClassifier::classify`] parses a (possibly multi-statement) query
//! string with the PostgreSQL dialect of `sqlparser` and reports every table
//! each statement touches together with the kind of access. A batch is a read,
//! and therefore eligible for replicas and the result cache, only when every
//! access is a `SELECT`.

pub mod classifier;
pub mod error;

pub use classifier::QueryClassifier;
pub use error::ClassifyError;
