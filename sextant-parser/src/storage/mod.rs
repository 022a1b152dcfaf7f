//! Storage layer for the Sextant parser.
//!
//! Provides DuckDB-based storage for the workspace with:
//! - Schema management
//! - Re-entrant scoped transactions shared across threads
//! - Build-graph, file, symbol and include queries
//! - Cluster, statistics and metadata persistence

mod actions;
mod clusters;
mod database;
mod files;
mod schema;
mod statistics;
mod symbols;

pub use database::{Database, Tx};
pub use schema::SCHEMA_VERSION;
pub use statistics::StatRow;
