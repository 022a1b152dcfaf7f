//! Full parse run: discovery, build-log import, scheduling and collection,
//! post-parse hooks, clustering and statistics.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::buildlog::{import_actions, load_build_log, ImportSummary};
use crate::cluster::{ClusterEngine, ClusterSummary};
use crate::config::SextantConfig;
use crate::discovery::{run_discovery, DiscoverySummary};
use crate::parse::{
    ParseStats, ParseStatsSnapshot, ResultCollector, ScheduleSummary, TaskScheduler,
};
use crate::parser::{ParseContext, ParserOptions, ParserRegistry};
use crate::storage::Database;

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub build_log: Option<PathBuf>,
    /// Project name recorded on imported actions
    pub project: String,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let project = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string());
        Self {
            root,
            build_log: None,
            project,
        }
    }

    pub fn with_build_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_log = Some(path.into());
        self
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub repositories: usize,
    pub actions_imported: usize,
    pub schedule: ScheduleSummary,
    pub parse: ParseStatsSnapshot,
    pub cluster: Option<ClusterSummary>,
    pub duration: Duration,
}

/// Pipeline over one workspace database.
pub struct Pipeline {
    db: Arc<Database>,
    config: SextantConfig,
    registry: Arc<ParserRegistry>,
}

impl Pipeline {
    /// Pipeline with the built-in parsers, minus those disabled in `config`.
    pub fn new(db: Arc<Database>, config: SextantConfig) -> Self {
        let mut registry = ParserRegistry::with_defaults();
        for name in &config.parse.disabled_parsers {
            registry.disable(name);
        }
        Self {
            db,
            config,
            registry: Arc::new(registry),
        }
    }

    /// Replace the parser registry.
    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &SextantConfig {
        &self.config
    }

    /// Run every stage. `progress(current, total)` is called once per
    /// scheduled task.
    pub fn run<F>(&self, options: &RunOptions, progress: F) -> Result<RunSummary>
    where
        F: FnMut(usize, usize),
    {
        let start = Instant::now();
        info!("Starting parse run in {:?}", options.root);

        // 1. Discovery
        let discovery = self.discover(&options.root)?;

        // 2. Build graph
        let imported = match &options.build_log {
            Some(path) => self.import(path, &options.project)?,
            None => ImportSummary::default(),
        };

        // 3. Schedule and collect
        let stats = Arc::new(ParseStats::new());
        let schedule = self.parse(&options.root, Arc::clone(&stats), progress)?;

        // 4. Parser hooks
        self.post_parse(&stats);

        // 5. Clustering
        let cluster = if self.config.cluster.enabled {
            let engine = ClusterEngine::new(Arc::clone(&self.db), self.config.cluster_jobs())?;
            Some(engine.run().context("Clustering failed")?)
        } else {
            info!("Clustering disabled");
            None
        };

        // 6. Statistics
        self.persist_statistics(&stats, cluster.as_ref())?;

        let parse = stats.snapshot();
        let duration = start.elapsed();
        info!(
            "Run finished in {:?}: {} succeeded, {} failed, {} deferred",
            duration, parse.succeeded, parse.failed, parse.deferred
        );

        Ok(RunSummary {
            files_discovered: discovery.walk.files,
            repositories: discovery.repositories,
            actions_imported: imported.imported,
            schedule,
            parse,
            cluster,
            duration,
        })
    }

    fn discover(&self, root: &Path) -> Result<DiscoverySummary> {
        if !root.is_dir() {
            warn!("Root {:?} is not a directory; skipping discovery", root);
            return Ok(DiscoverySummary::default());
        }
        run_discovery(&self.db, root, &self.config)
    }

    fn import(&self, path: &Path, project: &str) -> Result<ImportSummary> {
        let actions = load_build_log(path)?;
        info!("Read {} actions from {:?}", actions.len(), path);
        import_actions(&self.db, &actions, project)
    }

    fn parse<F>(&self, root: &Path, stats: Arc<ParseStats>, progress: F) -> Result<ScheduleSummary>
    where
        F: FnMut(usize, usize),
    {
        let collector = Arc::new(ResultCollector::new(
            Arc::clone(&self.db),
            Arc::clone(&stats),
            self.config.poll_interval(),
        ));
        collector.start()?;

        let mut scheduler = TaskScheduler::new(
            Arc::clone(&self.db),
            Arc::clone(&self.registry),
            Arc::clone(&collector),
            stats,
        )
        .with_whole_command(self.config.parse.whole_command)
        .with_include_paths(self.config.include_paths(root));

        let scheduled = scheduler.run(progress);
        // Drain even when scheduling failed part-way.
        collector.stop();
        scheduled
    }

    fn post_parse(&self, stats: &ParseStats) {
        let options = ParserOptions::default();
        for parser in self.registry.enabled() {
            let result = self.db.transaction(|tx| {
                let ctx = ParseContext {
                    tx,
                    options: &options,
                    db: &self.db,
                };
                parser.post_parse(&ctx, stats)
            });
            if let Err(e) = result {
                warn!("Post-parse hook of {} failed: {:#}", parser.name(), e);
            }
        }
    }

    fn persist_statistics(
        &self,
        stats: &ParseStats,
        cluster: Option<&ClusterSummary>,
    ) -> Result<()> {
        self.db.transaction(|tx| {
            tx.clear_statistics("parse")?;
            for row in stats.rows() {
                tx.put_statistic(&row)?;
            }
            if let Some(cluster) = cluster {
                tx.clear_statistics("cluster")?;
                for row in cluster.rows() {
                    tx.put_statistic(&row)?;
                }
            }
            tx.set_metadata("last_run", &chrono::Utc::now().to_rfc3339())
        })
    }
}
