//! Result collector.
//!
//! Owns every dispatched build action until all of its parse results have
//! resolved, then marks the action `Parsed`. Work arrives through [`queue`]
//! from the scheduler thread and is polled on a dedicated background thread
//! without ever blocking on a single result, so a slow parse never starves
//! the rest of the backlog.
//!
//! [`queue`]: ResultCollector::queue

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use sextant_core::{ActionId, BuildActionState, ParseResult};

use super::stats::ParseStats;
use super::task::AsyncBuildAction;
use crate::storage::Database;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

struct Shared {
    db: Arc<Database>,
    stats: Arc<ParseStats>,
    /// Actions queued and not yet marked; separate from the hand-off channel.
    in_flight: Mutex<HashSet<ActionId>>,
    running: AtomicBool,
    total: AtomicUsize,
    completed: AtomicUsize,
    poll_interval: Duration,
}

/// Background reconciliation of asynchronous parse results.
pub struct ResultCollector {
    shared: Arc<Shared>,
    sender: UnboundedSender<AsyncBuildAction>,
    receiver: Mutex<Option<UnboundedReceiver<AsyncBuildAction>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ResultCollector {
    pub fn new(db: Arc<Database>, stats: Arc<ParseStats>, poll_interval: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                db,
                stats,
                in_flight: Mutex::new(HashSet::new()),
                running: AtomicBool::new(false),
                total: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                poll_interval,
            }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Start the background thread. A collector starts at most once.
    pub fn start(&self) -> Result<()> {
        let Some(receiver) = self.receiver.lock().take() else {
            bail!("Result collector already started");
        };
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("result-collector".to_string())
            .spawn(move || shared.run(receiver))
            .context("Failed to spawn result collector thread")?;
        *self.worker.lock() = Some(handle);
        tracing::debug!("Result collector started");
        Ok(())
    }

    /// Hand over a dispatched action. Never touches storage.
    pub fn queue(&self, unit: AsyncBuildAction) {
        let id = unit.action.id;
        self.shared.in_flight.lock().insert(id);
        if self.sender.send(unit).is_err() {
            tracing::warn!("Result collector closed; dropping action {}", id);
            self.shared.in_flight.lock().remove(&id);
        }
    }

    /// Whether `action` has been queued and not yet marked.
    pub fn is_pending(&self, action: ActionId) -> bool {
        self.shared.in_flight.lock().contains(&action)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Number of files expected in this run, for progress lines.
    pub fn set_total(&self, total: usize) {
        self.shared.total.store(total, Ordering::Relaxed);
    }

    /// Resolve every result of `unit` on the calling thread and mark it.
    ///
    /// Blocks on each handle; must not be called while the caller holds a
    /// transaction, since parsers may need storage to finish.
    pub fn process(&self, mut unit: AsyncBuildAction) {
        self.shared.drain(&mut unit);
        self.shared.finish(unit);
    }

    /// Stop accepting work and resolve everything outstanding.
    ///
    /// Returns once no unresolved result is left anywhere in the collector.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Result collector thread panicked");
            }
        }
        // Never started: drain whatever was queued on this thread.
        if let Some(mut receiver) = self.receiver.lock().take() {
            let mut working = Vec::new();
            self.shared.receive(&mut receiver, &mut working);
            self.shared.final_pass(working);
        }
        tracing::debug!("Result collector stopped");
    }
}

impl Drop for ResultCollector {
    fn drop(&mut self) {
        // A never-started collector may still hold queued work.
        if self.worker.get_mut().is_some() || self.receiver.get_mut().is_some() {
            self.stop();
        }
    }
}

impl Shared {
    fn run(&self, mut receiver: UnboundedReceiver<AsyncBuildAction>) {
        let mut working: Vec<AsyncBuildAction> = Vec::new();
        let mut last_progress = Instant::now();

        while self.running.load(Ordering::Acquire) {
            self.receive(&mut receiver, &mut working);
            if working.is_empty() {
                thread::sleep(self.poll_interval);
                continue;
            }

            let before = working.len();
            working = self.poll(working);

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                self.log_progress(working.len());
                last_progress = Instant::now();
            }
            if working.len() == before {
                thread::yield_now();
            }
        }

        self.receive(&mut receiver, &mut working);
        self.final_pass(working);
    }

    /// Move everything queued so far into the working set.
    fn receive(
        &self,
        receiver: &mut UnboundedReceiver<AsyncBuildAction>,
        working: &mut Vec<AsyncBuildAction>,
    ) {
        loop {
            match receiver.try_recv() {
                Ok(unit) => working.push(unit),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// One zero-timeout check of every pending result. Returns the actions
    /// that are still waiting.
    fn poll(&self, working: Vec<AsyncBuildAction>) -> Vec<AsyncBuildAction> {
        let mut waiting = Vec::with_capacity(working.len());
        for mut unit in working {
            let id = unit.action.id;
            let mut resolved = Vec::new();
            unit.results.retain_mut(|result| match result.handle.try_take() {
                Ok(None) => true,
                Ok(Some(outcome)) => {
                    resolved.push((result.language.clone(), outcome));
                    false
                }
                Err(e) => {
                    tracing::warn!("Action {}: {} ({})", id, e, result.path);
                    resolved.push((result.language.clone(), ParseResult::Fail));
                    false
                }
            });
            for (language, outcome) in resolved {
                self.account(&mut unit, language.as_deref(), outcome);
            }

            if unit.is_complete() {
                self.finish(unit);
            } else {
                waiting.push(unit);
            }
        }
        waiting
    }

    /// Block on every result of `unit`.
    fn drain(&self, unit: &mut AsyncBuildAction) {
        let id = unit.action.id;
        for result in std::mem::take(&mut unit.results) {
            let outcome = match result.handle.wait() {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Action {}: {} ({})", id, e, result.path);
                    ParseResult::Fail
                }
            };
            self.account(unit, result.language.as_deref(), outcome);
        }
    }

    fn final_pass(&self, working: Vec<AsyncBuildAction>) {
        if !working.is_empty() {
            tracing::info!("Draining {} outstanding build actions", working.len());
        }
        for mut unit in working {
            self.drain(&mut unit);
            self.finish(unit);
        }
    }

    fn account(&self, unit: &mut AsyncBuildAction, language: Option<&str>, outcome: ParseResult) {
        if outcome == ParseResult::Fail {
            tracing::debug!("Action {}: parse failed", unit.action.id);
        }
        unit.note(outcome);
        self.stats.record(language, outcome);
    }

    /// Mark a fully resolved action `Parsed` and release it.
    fn finish(&self, unit: AsyncBuildAction) {
        let id = unit.action.id;
        if unit.is_partial() {
            self.stats.record_partial();
        }
        match self
            .db
            .transaction(|tx| tx.set_action_state(id, BuildActionState::Parsed))
        {
            Ok(true) => tracing::debug!("Action {} parsed", id),
            Ok(false) => tracing::debug!("Action {} was already finished", id),
            Err(e) => tracing::warn!("Failed to mark action {} parsed: {:#}", id, e),
        }
        self.in_flight.lock().remove(&id);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn log_progress(&self, waiting: usize) {
        let snapshot = self.stats.snapshot();
        tracing::info!(
            "Collected {} of {} files ({} actions done, {} waiting)",
            snapshot.succeeded + snapshot.failed + snapshot.deferred,
            self.total.load(Ordering::Relaxed),
            self.completed.load(Ordering::Relaxed),
            waiting
        );
    }
}
