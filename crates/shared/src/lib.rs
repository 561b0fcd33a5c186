//! WasteWise Shared Types and Utilities
//!
//! Domain types, the audit sink contract and database helpers shared by the
//! billing, dispatch and API crates.

pub mod audit;
pub mod db;
pub mod types;

pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, PgAuditSink};
pub use db::*;
pub use types::*;
