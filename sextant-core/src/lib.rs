//! Sextant core - model types and algorithms shared by the parse pipeline.
//!
//! This crate holds the pieces that do not depend on a storage engine:
//!
//! - **Data model**: build actions, files, parse outcomes, symbols
//! - **Root traversal**: one directory walk feeding several subscribers,
//!   each able to withdraw from a subtree
//! - **Eliminated transitive closure**: breadth-first leaf propagation over a
//!   batched one-hop relation, used by symbol clustering
//! - **Parse handles**: pollable outcomes of work running on other threads

pub mod handle;
pub mod lang;
pub mod propagate;
pub mod traversal;
pub mod types;

pub use handle::{HandleError, ParseHandle, ParseSender};
pub use propagate::Propagation;
pub use traversal::{FileType, Subscriber, Visit, WalkStats, Walker};
pub use types::*;
