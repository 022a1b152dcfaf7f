//! Symbol clustering: ambiguity markers, propagation jobs and the engine
//! tying them together.

mod engine;
pub mod marker;
mod pool;

pub use engine::{propagate_actions, propagate_includers, ClusterEngine, ClusterMap, ClusterSummary};
pub use marker::Marker;
pub use pool::WorkerPool;
