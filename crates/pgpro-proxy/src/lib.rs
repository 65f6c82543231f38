//! # pgpro-proxy
//!
//! PostgreSQL wire protocol front end of pg_pro.
//!
//! Each client connection becomes a [`Session`]: the proxy refuses TLS,
//! authenticates the client with an MD5 challenge, then for every query
//! classifies the statements, checks table access, answers reads from the
//! cache when it can, and otherwise routes to the primary or a replica.
//! Messages it does not understand are relayed byte for byte to the primary.
//!
//! ## Architecture
//!
//! ```text
//!   client
//!     │  PostgreSQL wire protocol
//!     ▼
//! ┌──────────────────────┐
//! │  Session             │
//! │  1. MD5 auth         │  ← pgpro-policy
//! │  2. Classify         │  ← pgpro-sql
//! │  3. Access gate      │  ← pgpro-policy
//! │  4. Cache lookup     │  ← pgpro-cache
//! │  5. Route / relay    │  ← pgpro-backend
//! └─────────┬────────────┘
//!           ▼
//!   primary / replicas
//! ```
//!
//! [`SpliceProxy`] is the alternative mode: every client connection is
//! spliced onto its own connection to the primary.

pub mod context;
pub mod error;
pub mod server;
pub mod session;

pub use context::{AppContext, SessionSettings};
pub use error::ProxyError;
pub use server::{PgProProxy, SpliceProxy, bind, shutdown_signal};
pub use session::{Session, SessionState};
