//! Cluster engine.
//!
//! After parsing, some symbols are not unique: the same function is defined
//! in several files, or a type has several definitions. For every file
//! holding such a symbol the engine computes its cluster, the set of final
//! build actions (typically link steps) the file's code can end up in.
//!
//! Files that are direct build sources are seeded with the actions compiling
//! them, and the actions are followed through the build graph to its leaves.
//! Headers never appear as build sources, so they go through their includers
//! instead: the cluster of a header is the union of the clusters of the
//! source files that eventually include it.

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sextant_core::{ActionId, FileId, Propagation};

use super::marker::Marker;
use super::pool::WorkerPool;
use crate::storage::{Database, StatRow, Tx};

pub type ClusterMap = BTreeMap<FileId, BTreeSet<ActionId>>;

/// Outcome of one clustering run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    /// Files holding at least one ambiguous symbol
    pub concerned: usize,
    /// Concerned files clustered through their own build actions
    pub seeded: usize,
    /// Concerned files clustered through their includers
    pub headers: usize,
    /// Concerned files neither built nor included
    pub excluded: usize,
    /// Files with a cluster entry at the end of the run
    pub clustered: usize,
    /// Propagation jobs that failed
    pub failed_jobs: usize,
}

impl ClusterSummary {
    pub fn rows(&self) -> Vec<StatRow> {
        vec![
            StatRow::new("cluster", "concerned", self.concerned as i64),
            StatRow::new("cluster", "seeded", self.seeded as i64),
            StatRow::new("cluster", "headers", self.headers as i64),
            StatRow::new("cluster", "excluded", self.excluded as i64),
            StatRow::new("cluster", "clustered", self.clustered as i64),
            StatRow::new("cluster", "failed_jobs", self.failed_jobs as i64),
        ]
    }
}

pub struct ClusterEngine {
    db: Arc<Database>,
    pool: WorkerPool,
    markers: Vec<Marker>,
    clusters: Arc<Mutex<ClusterMap>>,
}

/// Leaves of build-action propagation from `seeds`: the actions whose
/// targets no other action consumes.
pub fn propagate_actions(tx: &Tx<'_>, seeds: Vec<ActionId>) -> Result<BTreeSet<ActionId>> {
    let leaves = Propagation::new(seeds)
        .reject_revisits()
        .run(|frontier: &[ActionId]| tx.action_successors(frontier))?;
    Ok(leaves.into_iter().collect())
}

/// Leaves of includer propagation from `header`: files no other file
/// includes, typically the translation units.
pub fn propagate_includers(tx: &Tx<'_>, header: FileId) -> Result<Vec<FileId>> {
    Propagation::new([header])
        .reject_revisits()
        .run(|frontier: &[FileId]| tx.includers(frontier))
}

/// Cluster of a file from its own build actions; empty if it is not built.
fn cluster_of_source(tx: &Tx<'_>, file: FileId) -> Result<BTreeSet<ActionId>> {
    let seeds = tx.actions_with_source(file)?;
    if seeds.is_empty() {
        return Ok(BTreeSet::new());
    }
    propagate_actions(tx, seeds)
}

impl ClusterEngine {
    /// Engine with the default markers and a pool of `jobs` workers.
    pub fn new(db: Arc<Database>, jobs: usize) -> Result<Self> {
        Ok(Self {
            db,
            pool: WorkerPool::new(jobs)?,
            markers: Marker::all(),
            clusters: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    pub fn with_markers(mut self, markers: Vec<Marker>) -> Self {
        self.markers = markers;
        self
    }

    /// Files holding a symbol that fails any marker.
    pub fn files_concerned(&self) -> Result<BTreeSet<FileId>> {
        self.db.transaction(|tx| {
            let mut files = BTreeSet::new();
            for marker in &self.markers {
                let found = tx.files_for_marker(&marker.sql())?;
                tracing::debug!("Marker {}: {} files", marker.name, found.len());
                files.extend(found);
            }
            Ok(files)
        })
    }

    /// Compute and persist clusters for every concerned file.
    ///
    /// With a single worker the whole run shares one transaction; otherwise
    /// each job opens its own.
    pub fn run(&self) -> Result<ClusterSummary> {
        self.clusters.lock().clear();
        if self.pool.is_inline() {
            self.db.transaction(|_| self.run_inner())
        } else {
            self.run_inner()
        }
    }

    fn run_inner(&self) -> Result<ClusterSummary> {
        let failures_before = self.pool.failures();
        let concerned = self.files_concerned()?;
        let mut summary = ClusterSummary {
            concerned: concerned.len(),
            ..Default::default()
        };
        if concerned.is_empty() {
            tracing::info!("No ambiguous symbols; nothing to cluster");
        }

        let (sources, headers) = self.db.transaction(|tx| {
            let mut sources = Vec::new();
            let mut headers = Vec::new();
            for &file in &concerned {
                if !tx.actions_with_source(file)?.is_empty() {
                    sources.push(file);
                } else if tx.is_included(file)? {
                    headers.push(file);
                } else {
                    tracing::info!("File {} is neither built nor included; excluded", file);
                    summary.excluded += 1;
                }
            }
            Ok((sources, headers))
        })?;
        summary.seeded = sources.len();
        summary.headers = headers.len();

        for file in sources {
            let db = Arc::clone(&self.db);
            let clusters = Arc::clone(&self.clusters);
            self.pool.execute(format!("seed-{}", file), move || {
                let leaves = db.transaction(|tx| cluster_of_source(tx, file))?;
                clusters.lock().insert(file, leaves);
                Ok(())
            });
        }
        self.wait_for_clusters();

        for header in headers {
            let db = Arc::clone(&self.db);
            let clusters = Arc::clone(&self.clusters);
            self.pool.execute(format!("header-{}", header), move || {
                let cluster = db.transaction(|tx| {
                    let mut cluster = BTreeSet::new();
                    for leaf in propagate_includers(tx, header)? {
                        let known = clusters.lock().get(&leaf).cloned();
                        match known {
                            Some(actions) => cluster.extend(actions),
                            None => cluster.extend(cluster_of_source(tx, leaf)?),
                        }
                    }
                    Ok(cluster)
                })?;
                clusters.lock().insert(header, cluster);
                Ok(())
            });
        }
        self.wait_for_clusters();

        let map = self.clusters();
        let written = self.db.transaction(|tx| tx.replace_clusters(&map))?;
        summary.clustered = map.len();
        summary.failed_jobs = self.pool.failures() - failures_before;
        tracing::info!(
            "Clustered {} files ({} seeded, {} headers, {} excluded; {} rows)",
            summary.clustered,
            summary.seeded,
            summary.headers,
            summary.excluded,
            written
        );
        Ok(summary)
    }

    /// Block until every submitted propagation job has finished.
    pub fn wait_for_clusters(&self) {
        self.pool.wait();
    }

    /// Snapshot of the in-memory cluster map.
    pub fn clusters(&self) -> ClusterMap {
        self.clusters.lock().clone()
    }
}
