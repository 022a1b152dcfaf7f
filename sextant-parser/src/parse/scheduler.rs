//! Task scheduler.
//!
//! Walks the outstanding build actions in id order, one transaction per
//! action, and dispatches their source files to parsers. The scheduler never
//! waits on a parse: handles go straight to the [`ResultCollector`].

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sextant_core::{
    ActionId, BuildActionState, BuildActionType, ParseHandle, ParseResult, SourceTarget,
};

use super::collector::ResultCollector;
use super::stats::ParseStats;
use super::task::{pair_files, AsyncBuildAction, AsyncResult, ParserTask};
use crate::parser::{ParseContext, ParserOptions, ParserRegistry};
use crate::storage::{Database, Tx};

/// What one scheduling pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    /// Actions taken from the build graph
    pub tasks: usize,
    /// Parse handles handed to the collector
    pub dispatched: usize,
    /// Actions marked `Skipped` for missing source files
    pub skipped: usize,
    /// Link actions marked `Parsed` without parsing
    pub links: usize,
}

enum Dispatch {
    Queued(usize),
    Linked,
    Skipped,
}

pub struct TaskScheduler {
    db: Arc<Database>,
    registry: Arc<ParserRegistry>,
    collector: Arc<ResultCollector>,
    stats: Arc<ParseStats>,
    whole_command: bool,
    include_paths: Vec<PathBuf>,
    cursor: Option<ActionId>,
}

impl TaskScheduler {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ParserRegistry>,
        collector: Arc<ResultCollector>,
        stats: Arc<ParseStats>,
    ) -> Self {
        Self {
            db,
            registry,
            collector,
            stats,
            whole_command: false,
            include_paths: Vec::new(),
            cursor: None,
        }
    }

    /// Prefer one `parse_command` per multi-source action.
    pub fn with_whole_command(mut self, whole_command: bool) -> Self {
        self.whole_command = whole_command;
        self
    }

    /// Include paths searched before those named on each command line.
    pub fn with_include_paths(mut self, include_paths: Vec<PathBuf>) -> Self {
        self.include_paths = include_paths;
        self
    }

    /// Next outstanding action after the cursor that is not already in
    /// flight, with its source/target pairs.
    pub fn schedule_next(&mut self, tx: &Tx<'_>) -> Result<Option<ParserTask>> {
        loop {
            let Some(action) = tx.next_outstanding_action(self.cursor)? else {
                return Ok(None);
            };
            self.cursor = Some(action.id);
            if self.collector.is_pending(action.id) {
                tracing::debug!("Action {} still in flight", action.id);
                continue;
            }

            let pairs = pair_files(tx.action_sources(action.id)?, tx.action_targets(action.id)?);
            let options = ParserOptions::for_label(&action.label, &self.include_paths);
            let whole_command = self.whole_command && pairs.len() > 1;
            return Ok(Some(ParserTask {
                action,
                pairs,
                options,
                whole_command,
            }));
        }
    }

    /// Schedule and dispatch every outstanding action once.
    ///
    /// `progress(current, total)` runs once per task with source-file counts.
    pub fn run<F>(&mut self, mut progress: F) -> Result<ScheduleSummary>
    where
        F: FnMut(usize, usize),
    {
        let db = Arc::clone(&self.db);
        let total = db.transaction(|tx| tx.count_outstanding_sources())?;
        self.collector.set_total(total);
        self.cursor = None;
        tracing::info!("Scheduling parse tasks for {} source files", total);

        let mut summary = ScheduleSummary::default();
        let mut current = 0;
        loop {
            let step = db.transaction(|tx| {
                let Some(task) = self.schedule_next(tx)? else {
                    return Ok(None);
                };
                let files = task.pairs.len();
                Ok(Some((files, self.dispatch(tx, task)?)))
            })?;
            let Some((files, dispatch)) = step else {
                break;
            };

            summary.tasks += 1;
            match dispatch {
                Dispatch::Queued(handles) => summary.dispatched += handles,
                Dispatch::Linked => summary.links += 1,
                Dispatch::Skipped => summary.skipped += 1,
            }
            current += files;
            progress(current, total);
        }

        tracing::info!(
            "Scheduled {} tasks ({} parses, {} links, {} skipped)",
            summary.tasks,
            summary.dispatched,
            summary.links,
            summary.skipped
        );
        Ok(summary)
    }

    fn dispatch(&self, tx: &Tx<'_>, task: ParserTask) -> Result<Dispatch> {
        let ParserTask {
            action,
            pairs,
            options,
            whole_command,
        } = task;

        if action.action_type == BuildActionType::Link {
            if action.state != BuildActionState::Parsed
                && tx.set_action_state(action.id, BuildActionState::Parsed)?
            {
                self.stats.record(None, ParseResult::Success);
            }
            return Ok(Dispatch::Linked);
        }

        if pairs.iter().any(|pair| pair.source.is_none()) {
            tracing::warn!(
                "Action {} references a missing source file; skipping",
                action.id
            );
            tx.set_action_state(action.id, BuildActionState::Skipped)?;
            self.stats.record(None, ParseResult::Fail);
            return Ok(Dispatch::Skipped);
        }
        if pairs.iter().any(|pair| pair.target.is_none()) {
            tracing::warn!("Action {} has a source without a target", action.id);
        }

        let ctx = ParseContext {
            tx,
            options: &options,
            db: &self.db,
        };
        let mut results = Vec::new();
        if whole_command {
            let first = pairs[0].source.as_ref();
            let handle = match first.and_then(|file| self.registry.resolve(Path::new(&file.path))) {
                Some(parser) => parser.parse_command(&ctx, &action, &pairs),
                None => self.no_parser(first.map(|f| f.path.as_str()).unwrap_or_default()),
            };
            results.push(AsyncResult::new(handle, first));
        } else {
            for SourceTarget { source, target } in &pairs {
                let Some(source) = source else {
                    continue;
                };
                let handle = match self.registry.resolve(Path::new(&source.path)) {
                    Some(parser) => parser.parse(&ctx, &action, source, target.as_ref()),
                    None => self.no_parser(&source.path),
                };
                results.push(AsyncResult::new(handle, Some(source)));
            }
        }

        let count = results.len();
        tracing::debug!("Action {}: dispatched {} parses", action.id, count);
        self.collector.queue(AsyncBuildAction::new(action, results));
        Ok(Dispatch::Queued(count))
    }

    fn no_parser(&self, path: &str) -> ParseHandle {
        tracing::warn!("No parser for {}", path);
        ParseHandle::ready(ParseResult::Success)
    }
}
