//! Root traversal with multiple subscribers.
//!
//! A single walk over a directory tree feeds several independent consumers
//! (repository discovery, file census, ...). Each subscriber can withdraw its
//! interest in a subtree; once nobody is interested the walk skips the rest
//! of that subtree.
//!
//! Entries arrive depth-first in file-name order from `walkdir`; a stack of
//! per-depth subscriber sets tracks who is still listening.

use std::cell::Cell;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Type of a visited filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Regular,
    Symlink,
    Other,
}

impl From<fs::FileType> for FileType {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_file() {
            FileType::Regular
        } else {
            FileType::Other
        }
    }
}

/// Whether a subscriber wants to keep receiving entries below this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// A consumer of traversal entries.
pub trait Subscriber {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Called once per entry. Returning `Stop` (or an error) removes this
    /// subscriber from the entry's subtree.
    fn visit(&mut self, path: &Path, file_type: FileType) -> Result<Visit, String>;
}

/// Counters reported at the end of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub files: usize,
    pub directories: usize,
    pub hidden_skipped: usize,
    pub errors: usize,
}

/// Directory walker.
#[derive(Debug, Clone)]
pub struct Walker {
    progress_interval: Duration,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Walker {
    /// Create a walker logging progress every `progress_interval`.
    pub fn new(progress_interval: Duration) -> Self {
        Self { progress_interval }
    }

    /// Walk `root`, feeding every entry to the still-interested subscribers.
    pub fn walk(&self, root: &Path, subscribers: &mut [&mut dyn Subscriber]) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut last_report = Instant::now();
        let hidden = Cell::new(0usize);

        let all: Vec<usize> = (0..subscribers.len()).collect();
        // levels[d]: subscribers still interested in the open directory at depth d
        let mut levels: Vec<Vec<usize>> = Vec::new();

        let mut entries = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() > 0 && is_hidden(entry) {
                    hidden.set(hidden.get() + 1);
                    return false;
                }
                true
            });

        while let Some(entry) = entries.next() {
            if last_report.elapsed() >= self.progress_interval {
                info!(
                    "Traversal progress: {} files, {} directories visited",
                    stats.files, stats.directories
                );
                last_report = Instant::now();
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read {:?}, skipping: {}", e.path().unwrap_or(root), e);
                    stats.errors += 1;
                    continue;
                }
            };

            let depth = entry.depth();
            levels.truncate(depth);
            let interested = match depth {
                0 => all.clone(),
                _ => levels.get(depth - 1).cloned().unwrap_or_default(),
            };

            let file_type = FileType::from(entry.file_type());
            match file_type {
                FileType::Directory => stats.directories += 1,
                _ => stats.files += 1,
            }

            let path = entry.path();
            let still: Vec<usize> = interested
                .into_iter()
                .filter(|&idx| notify(&mut *subscribers[idx], path, file_type))
                .collect();

            if file_type == FileType::Directory {
                if still.is_empty() {
                    entries.skip_current_dir();
                } else {
                    levels.push(still);
                }
            }
        }

        stats.hidden_skipped = hidden.get();
        info!(
            "Traversal of {:?} finished: {} files, {} directories",
            root, stats.files, stats.directories
        );
        stats
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Deliver one entry to one subscriber. Returns whether it stays interested.
fn notify(subscriber: &mut dyn Subscriber, path: &Path, file_type: FileType) -> bool {
    match catch_unwind(AssertUnwindSafe(|| subscriber.visit(path, file_type))) {
        Ok(Ok(Visit::Continue)) => true,
        Ok(Ok(Visit::Stop)) => {
            debug!("Subscriber {} withdrew at {:?}", subscriber.name(), path);
            false
        }
        Ok(Err(e)) => {
            warn!(
                "Subscriber {} failed at {:?}, dropping it for this subtree: {}",
                subscriber.name(),
                path,
                e
            );
            false
        }
        Err(_) => {
            warn!(
                "Subscriber {} panicked at {:?}, dropping it for this subtree",
                subscriber.name(),
                path
            );
            false
        }
    }
}
