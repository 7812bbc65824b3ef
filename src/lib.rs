//! Online agglomerative clustering and recall engine for a reuse-recorded-
//! resolution workflow: cluster assignment over Jaro-Winkler similarity,
//! per-cluster statistics, periodic reclustering, and the file-based
//! contracts with the regex applier/generator worker processes.

pub mod assignment;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod recluster;
pub mod similarity;
pub mod stats;
pub mod store;
pub mod worker;

pub use error::{Error, Result};

use std::path::Path;

use serde::Serialize;

use crate::config::Config;
use crate::pipeline::{ConflictDataset, PipelineSummary, RunContext};
use crate::recluster::ReclusterCounters;
use crate::store::{ClusterIndex, ClusterStore};

/// Top-level facade over the engine: owns the resolved configuration and
/// exposes the operations the CLI drives.
pub struct Engine {
    config: Config,
}

/// Snapshot of the engine's current resolved configuration and cluster
/// index, for the `status`/`config` CLI commands.
#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub workdir: String,
    pub cluster_count: usize,
    pub total_records: usize,
    pub average_intra_similarity: f64,
}

impl Engine {
    /// Open with configuration loaded from `config.properties` under
    /// `project_root`.
    pub fn open(project_root: &Path) -> Result<Self> {
        let config = Config::load(project_root)?;
        Ok(Self { config })
    }

    pub fn open_with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> ClusterStore {
        ClusterStore::new(&self.config.cluster_index_path)
    }

    /// Run the full pipeline over every record in `dataset_path`, in
    /// document order.
    pub fn run(&self, dataset_path: &Path) -> Result<PipelineSummary> {
        let dataset = ConflictDataset::load(dataset_path)?;
        let mut ctx = RunContext::new(self.config.clone());
        pipeline::run_dataset(&mut ctx, &dataset)
    }

    /// Force a reclustering attempt regardless of the usual preconditions.
    pub fn force_recluster(&self) -> Result<recluster::ReclusterOutcome> {
        let store = self.store();
        let index = store.load()?;
        let outcome = recluster::recluster(&index, self.config.similarity_threshold);
        if outcome.accepted {
            store.save(&outcome.index)?;
        }
        Ok(outcome)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let index = self.store().load()?;
        Ok(EngineStatus {
            workdir: self.config.workdir.display().to_string(),
            cluster_count: index.clusters.len(),
            total_records: index.total_records(),
            average_intra_similarity: recluster::average_intra_similarity(&index),
        })
    }

    pub fn load_index(&self) -> Result<ClusterIndex> {
        self.store().load()
    }

    pub fn should_recluster(&self, counters: &ReclusterCounters) -> Result<bool> {
        Ok(recluster::should_recluster(&self.load_index()?, counters))
    }
}
