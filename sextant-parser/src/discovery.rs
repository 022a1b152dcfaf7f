//! Workspace discovery run before scheduling: one root traversal feeding the
//! repository finder and the language census.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sextant_core::lang::detect_language;
use sextant_core::{FileType, Subscriber, Visit, WalkStats, Walker};

use crate::config::SextantConfig;
use crate::storage::{Database, StatRow};

/// Records directories that hold a version-control checkout.
#[derive(Debug, Default)]
pub struct RepositoryFinder {
    pub repositories: Vec<(PathBuf, &'static str)>,
}

impl RepositoryFinder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Subscriber for RepositoryFinder {
    fn name(&self) -> &str {
        "repositories"
    }

    fn visit(&mut self, path: &Path, file_type: FileType) -> Result<Visit, String> {
        if file_type == FileType::Directory && path.join(".git").exists() {
            tracing::debug!("Found git repository at {:?}", path);
            self.repositories.push((path.to_path_buf(), "git"));
        }
        Ok(Visit::Continue)
    }
}

/// Counts regular files per detected language.
#[derive(Debug, Default)]
pub struct LanguageCensus {
    pub counts: BTreeMap<String, usize>,
    pub files: usize,
    max_files: Option<usize>,
}

impl LanguageCensus {
    /// Census that withdraws after `max_files` files.
    pub fn new(max_files: Option<usize>) -> Self {
        Self {
            max_files,
            ..Default::default()
        }
    }

    fn full(&self) -> bool {
        self.max_files.is_some_and(|max| self.files >= max)
    }
}

impl Subscriber for LanguageCensus {
    fn name(&self) -> &str {
        "languages"
    }

    fn visit(&mut self, path: &Path, file_type: FileType) -> Result<Visit, String> {
        if self.full() {
            return Ok(Visit::Stop);
        }
        if file_type == FileType::Regular {
            self.files += 1;
            if let Some(language) = detect_language(path) {
                *self.counts.entry(language.to_string()).or_default() += 1;
            }
        }
        Ok(Visit::Continue)
    }
}

/// What discovery found.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    pub walk: WalkStats,
    pub repositories: usize,
    pub languages: BTreeMap<String, usize>,
}

/// Walk `root` once with both subscribers and persist what they found.
pub fn run_discovery(
    db: &Database,
    root: &Path,
    config: &SextantConfig,
) -> Result<DiscoverySummary> {
    let mut repositories = RepositoryFinder::new();
    let mut census = LanguageCensus::new(config.traversal.max_files);

    let walker = Walker::new(config.progress_interval());
    let walk = walker.walk(root, &mut [&mut repositories, &mut census]);

    db.transaction(|tx| {
        for (path, kind) in &repositories.repositories {
            tx.add_repository(&path.to_string_lossy(), kind)?;
        }
        tx.clear_statistics("language")?;
        for (language, count) in &census.counts {
            tx.put_statistic(&StatRow::new("language", language.clone(), *count as i64))?;
        }
        Ok(())
    })?;

    tracing::info!(
        "Discovery: {} files, {} directories, {} repositories",
        walk.files,
        walk.directories,
        repositories.repositories.len()
    );
    Ok(DiscoverySummary {
        walk,
        repositories: repositories.repositories.len(),
        languages: census.counts,
    })
}
