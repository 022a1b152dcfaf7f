//! Parse-task orchestration: scheduling build actions onto parsers and
//! collecting their asynchronous results.

pub mod collector;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use collector::ResultCollector;
pub use scheduler::{ScheduleSummary, TaskScheduler};
pub use stats::{ParseStats, ParseStatsSnapshot};
pub use task::{pair_files, AsyncBuildAction, AsyncResult, ParserTask};
