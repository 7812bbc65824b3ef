//! Reads the input dataset and drives each record through the bridge,
//! assignment, statistics, and reclustering stages in order.

use std::fs;
use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assignment::{self, Assignment};
use crate::config::Config;
use crate::error::Result;
use crate::recluster::{self, ReclusterCounters};
use crate::stats::{self, STATISTICS_HEADER};
use crate::store::{ClusterIndex, ClusterRecord, ClusterStore};
use crate::worker::{self, escape_csv, GeneratorTrigger};

/// A single input item. Only `conflict` and `resolution` participate in
/// clustering; the rest is carried through for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: i64,
    pub conflict: String,
    pub resolution: String,
    #[serde(default)]
    pub v1: String,
    #[serde(default)]
    pub v2: String,
    #[serde(default)]
    pub devdecision: String,
}

impl ConflictRecord {
    /// A record is rejected before assignment if either side spans more
    /// than one line; it is still reported to the applier.
    pub fn is_multiline(&self) -> bool {
        self.conflict.contains('\n') || self.resolution.contains('\n')
    }

    pub fn as_cluster_record(&self) -> ClusterRecord {
        ClusterRecord::new(self.conflict.clone(), self.resolution.clone())
    }
}

/// Top level of the input dataset: a mapping from arbitrary group names to
/// arrays of records. Only the arrays are iterated; key names are ignored.
/// `IndexMap` keeps entries in the order they were read off the wire, which
/// matters here: cluster ids are handed out in processing order, so
/// reordering groups would reorder id allocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ConflictDataset {
    groups: IndexMap<String, Vec<ConflictRecord>>,
}

impl ConflictDataset {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let dataset: Self = serde_json::from_str(&contents)
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?;
        Ok(dataset)
    }

    /// All records across every group, in document order (groups visited
    /// in the order they appear in the input, records within a group in
    /// array order).
    pub fn records(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.groups.values().flatten()
    }
}

/// One result row, written to the result CSV per record.
#[derive(Debug, Clone)]
pub struct RegexSuggestion {
    pub conflict: String,
    pub group_id: Option<u32>,
    pub best_similarity: f64,
    pub regex: String,
    pub replacement: String,
    pub expected_resolution: String,
    pub produced_resolution: String,
    pub upstream_side_b: String,
    pub developer_decision: String,
    pub input_id: i64,
    pub cluster_snapshot: String,
}

impl RegexSuggestion {
    pub fn to_csv_row(&self) -> String {
        [
            escape_csv(&self.conflict),
            escape_csv(&self.group_id.map(|g| g.to_string()).unwrap_or_default()),
            escape_csv(&format!("{:.6}", self.best_similarity)),
            escape_csv(&self.regex),
            escape_csv(&self.replacement),
            escape_csv(&self.expected_resolution),
            escape_csv(&self.produced_resolution),
            escape_csv(&self.upstream_side_b),
            escape_csv(&self.developer_decision),
            escape_csv(&self.input_id.to_string()),
            escape_csv(&self.cluster_snapshot),
        ]
        .join(",")
    }
}

/// Running context threaded through a pipeline run: everything that would
/// otherwise be process-global mutable state.
pub struct RunContext {
    pub config: Config,
    pub counters: ReclusterCounters,
    pub archive_sequence: usize,
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            counters: ReclusterCounters::default(),
            archive_sequence: 0,
        }
    }
}

/// Aggregate report returned after a full dataset run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected_multiline: usize,
    pub reclusters_attempted: usize,
    pub reclusters_accepted: usize,
    pub worker_failures: usize,
}

/// Drive every record in `dataset` through the pipeline in document order.
pub fn run_dataset(ctx: &mut RunContext, dataset: &ConflictDataset) -> Result<PipelineSummary> {
    let store = ClusterStore::new(&ctx.config.cluster_index_path);
    let mut index = store.load()?;
    let mut summary = PipelineSummary::default();

    for record in dataset.records() {
        run_record(ctx, &store, &mut index, record, &mut summary)?;
    }

    Ok(summary)
}

/// Five-step per-record sequence: apply existing regexes, assign to a
/// cluster, append statistics, regenerate regexes for the touched cluster,
/// optionally recluster.
fn run_record(
    ctx: &mut RunContext,
    store: &ClusterStore,
    index: &mut ClusterIndex,
    record: &ConflictRecord,
    summary: &mut PipelineSummary,
) -> Result<()> {
    debug!(id = record.id, "processing record");

    // A multi-line record is rejected before assignment but is still
    // reported to the applier, using the id a future assignment would
    // land on as its best-effort group context.
    let cluster_record = record.as_cluster_record();
    let assignment = if record.is_multiline() {
        None
    } else {
        Some(assignment::assign(
            index,
            &cluster_record,
            ctx.config.linkage,
            ctx.config.similarity_threshold,
        ))
    };
    let probe_group_id = assignment.as_ref().map(Assignment::group_id).unwrap_or_else(|| index.next_id());

    // Step 1: regex applier, invoked for every record regardless of outcome.
    let candidates = worker::run_applier(
        &ctx.config.workdir,
        probe_group_id,
        &record.conflict,
        &ctx.config.string_replace_path,
    )?;
    let (regex, replacement, produced) = match worker::best_candidate(&candidates, &record.resolution) {
        Some((c, _)) => (c.regex.clone(), c.replacement.clone(), c.produced_resolution.clone()),
        None => (String::new(), String::new(), String::new()),
    };
    let best_similarity = if produced.is_empty() {
        0.0
    } else {
        crate::similarity::jaro_winkler(&record.resolution, &produced)
    };

    let suggestion = |group_id: Option<u32>, produced: String, regex: String, replacement: String| RegexSuggestion {
        conflict: record.conflict.clone(),
        group_id,
        best_similarity,
        regex,
        replacement,
        expected_resolution: record.resolution.clone(),
        produced_resolution: produced,
        upstream_side_b: record.v2.clone(),
        developer_decision: record.devdecision.clone(),
        input_id: record.id,
        cluster_snapshot: String::new(),
    };

    let Some(assignment) = assignment else {
        warn!(id = record.id, "multi-line record rejected before assignment");
        summary.rejected_multiline += 1;
        append_result_row(&ctx.config.regex_result_path, &suggestion(None, produced, regex, replacement))?;
        return Ok(());
    };

    // Step 2: assignment engine.
    let group_id = assignment.group_id();
    let is_duplicate = matches!(assignment, Assignment::Duplicate(_));

    if is_duplicate {
        summary.duplicates += 1;
        append_result_row(&ctx.config.regex_result_path, &suggestion(None, produced, regex, replacement))?;
    } else {
        index.insert(group_id, cluster_record);
        store.save(index)?;
        summary.inserted += 1;
        ctx.counters.records_added_since_start += 1;

        let snapshot = serde_json::to_string(index.get(group_id).unwrap_or(&[])).unwrap_or_default();
        let mut row = suggestion(Some(group_id), produced, regex, replacement);
        row.cluster_snapshot = snapshot;
        append_result_row(&ctx.config.regex_result_path, &row)?;

        // Step 3: statistics module, skipped for duplicates.
        let members = index.get(group_id).unwrap_or(&[]);
        let stats_row = stats::compute(group_id, members);
        append_statistics_row(&ctx.config.statistics_log_path, &stats_row)?;
    }

    // Step 4: regex generator for the touched cluster. Still invoked on a
    // duplicate per the duplicate error-handling contract.
    let cluster_size = index.get(group_id).map(<[_]>::len).unwrap_or(0);
    match worker::run_generator(
        &ctx.config.workdir,
        group_id,
        cluster_size,
        &ctx.config.performance_log_path,
        GeneratorTrigger::AfterInsert,
    ) {
        Ok(_) => {}
        Err(e) => {
            summary.worker_failures += 1;
            return Err(e);
        }
    }

    // Step 5: optional reclustering, skipped for duplicates (nothing changed).
    if !is_duplicate {
        maybe_recluster(ctx, store, index, summary)?;
    }

    Ok(())
}

/// Runs a reclustering attempt if the preconditions hold, updating
/// `summary`'s `reclusters_attempted`/`reclusters_accepted` counters to
/// reflect what actually happened.
fn maybe_recluster(
    ctx: &mut RunContext,
    store: &ClusterStore,
    index: &mut ClusterIndex,
    summary: &mut PipelineSummary,
) -> Result<()> {
    if !recluster::should_recluster(index, &ctx.counters) {
        return Ok(());
    }

    summary.reclusters_attempted += 1;
    let outcome = recluster::recluster(index, ctx.config.similarity_threshold);
    if outcome.accepted {
        summary.reclusters_accepted += 1;
        ctx.archive_sequence += 1;
        let archive_path = ctx.config.archive_path(ctx.archive_sequence);
        store.write(&archive_path, index)?;

        *index = outcome.index;
        store.save(index)?;
        ctx.counters.population_at_last_recluster = index.total_records();
        info!(
            old = outcome.old_avg_intra,
            new = outcome.new_avg_intra,
            "reclustering accepted"
        );
    } else {
        debug!(
            old = outcome.old_avg_intra,
            new = outcome.new_avg_intra,
            "reclustering rejected, keeping prior index"
        );
    }

    Ok(())
}

fn append_result_row(path: &Path, row: &RegexSuggestion) -> Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", row.to_csv_row())?;
    Ok(())
}

fn append_statistics_row(path: &Path, row: &stats::ClusterStats) -> Result<()> {
    let needs_header = !path.exists();
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    if needs_header {
        writeln!(file, "{STATISTICS_HEADER}")?;
    }
    writeln!(file, "{}", row.to_csv_row())?;
    Ok(())
}
