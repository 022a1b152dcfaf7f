//! Sextant parser - parse-task orchestration and symbol clustering.
//!
//! This library provides:
//! - Storage layer (DuckDB workspace database with scoped transactions)
//! - Parser capability, registry and the built-in C/C++ parser
//! - Task scheduler and result collector
//! - Cluster engine
//! - Discovery, build-log import, configuration and the run pipeline

pub mod buildlog;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod parse;
pub mod parser;
pub mod pipeline;
pub mod storage;

pub use config::SextantConfig;
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use storage::Database;
