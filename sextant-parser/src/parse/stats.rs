//! Parse outcome counters.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use sextant_core::ParseResult;

use crate::storage::StatRow;

/// Totals of a run, as reported at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStatsSnapshot {
    pub succeeded: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Actions with both succeeded and failed results
    pub partial: usize,
}

/// Counters shared by the scheduler and the collector thread.
#[derive(Debug, Default)]
pub struct ParseStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    deferred: AtomicUsize,
    partial: AtomicUsize,
    by_language: Mutex<BTreeMap<(ParseResult, String), usize>>,
}

impl ParseStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outcome, attributed to `language` when known.
    pub fn record(&self, language: Option<&str>, result: ParseResult) {
        let counter = match result {
            ParseResult::Success => &self.succeeded,
            ParseResult::Fail => &self.failed,
            ParseResult::Deferred => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(language) = language {
            *self
                .by_language
                .lock()
                .entry((result, language.to_string()))
                .or_default() += 1;
        }
    }

    pub fn record_partial(&self) {
        self.partial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ParseStatsSnapshot {
        ParseStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
        }
    }

    /// Rows for the `statistics` table: totals under `parse`, per-language
    /// counts under `parse.<status>`.
    pub fn rows(&self) -> Vec<StatRow> {
        let totals = self.snapshot();
        let mut rows = vec![
            StatRow::new("parse", "succeeded", totals.succeeded as i64),
            StatRow::new("parse", "failed", totals.failed as i64),
            StatRow::new("parse", "deferred", totals.deferred as i64),
            StatRow::new("parse", "partial", totals.partial as i64),
        ];
        for ((result, language), count) in self.by_language.lock().iter() {
            rows.push(StatRow::new(
                format!("parse.{}", result),
                language.clone(),
                *count as i64,
            ));
        }
        rows
    }
}
