//! Units of work moving from the scheduler to the collector.

use sextant_core::{BuildAction, File, ParseHandle, ParseResult, SourceTarget};

use crate::parser::ParserOptions;

/// One scheduled build action with its paired files.
#[derive(Debug, Clone)]
pub struct ParserTask {
    pub action: BuildAction,
    pub pairs: Vec<SourceTarget>,
    pub options: ParserOptions,
    /// Dispatch all pairs through one `parse_command` call.
    pub whole_command: bool,
}

/// Pair the ordered sources of an action with its ordered targets.
///
/// Positional when the counts match; otherwise every source builds the last
/// target (e.g. many objects into one binary); with no targets at all the
/// target side stays empty.
pub fn pair_files(sources: Vec<Option<File>>, targets: Vec<Option<File>>) -> Vec<SourceTarget> {
    if sources.len() == targets.len() {
        return sources
            .into_iter()
            .zip(targets)
            .map(|(source, target)| SourceTarget { source, target })
            .collect();
    }
    let last = targets.into_iter().last().flatten();
    sources
        .into_iter()
        .map(|source| SourceTarget {
            source,
            target: last.clone(),
        })
        .collect()
}

/// A dispatched parse whose outcome may still be pending.
#[derive(Debug)]
pub struct AsyncResult {
    pub handle: ParseHandle,
    /// Path shown in logs
    pub path: String,
    pub language: Option<String>,
}

impl AsyncResult {
    pub fn new(handle: ParseHandle, file: Option<&File>) -> Self {
        Self {
            handle,
            path: file.map(|f| f.path.clone()).unwrap_or_default(),
            language: file.and_then(|f| f.language.clone()),
        }
    }
}

/// A build action together with the results it still waits for.
#[derive(Debug)]
pub struct AsyncBuildAction {
    pub action: BuildAction,
    pub results: Vec<AsyncResult>,
    succeeded: usize,
    failed: usize,
}

impl AsyncBuildAction {
    pub fn new(action: BuildAction, results: Vec<AsyncResult>) -> Self {
        Self {
            action,
            results,
            succeeded: 0,
            failed: 0,
        }
    }

    /// Account for one resolved result.
    pub(crate) fn note(&mut self, result: ParseResult) {
        match result {
            ParseResult::Success => self.succeeded += 1,
            ParseResult::Fail => self.failed += 1,
            ParseResult::Deferred => {}
        }
    }

    /// Some results succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && self.failed > 0
    }

    pub fn is_complete(&self) -> bool {
        self.results.is_empty()
    }
}
