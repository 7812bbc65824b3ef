//! Spawns the two external transformation workers and parses their output.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::similarity::jaro_winkler;

const APPLIER_JAR: &str = "RegexReplacement.jar";
const GENERATOR_JAR: &str = "RandomSearchReplaceTurtle.jar";
const JAVA_BIN: &str = "/usr/bin/java";

/// A candidate regex/replacement block parsed from the applier's output
/// file: `regex`, `replacement`, `produced-resolution`, each on its own
/// newline-terminated line.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexCandidate {
    pub regex: String,
    pub replacement: String,
    pub produced_resolution: String,
}

/// Why the generator was invoked, for performance-log attribution only —
/// behavior is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorTrigger {
    AfterInsert,
    AfterRecluster,
}

/// Outcome of a `0`/`127`/other-exit-code worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    ExecutableMissing,
    Fatal(i32),
}

fn classify_exit(code: Option<i32>) -> WorkerExit {
    match code {
        Some(0) => WorkerExit::Success,
        Some(127) => WorkerExit::ExecutableMissing,
        Some(other) => WorkerExit::Fatal(other),
        None => WorkerExit::Fatal(-1),
    }
}

/// Invoke the regex applier for a single conflict string, parse its output
/// file, and return the parsed candidates (zero, one, or two blocks).
/// Deletes the output file afterward.
pub fn run_applier(workdir: &Path, group_id: u32, conflict: &str, output_path: &Path) -> Result<Vec<RegexCandidate>> {
    let status = Command::new(JAVA_BIN)
        .arg("-jar")
        .arg(APPLIER_JAR)
        .arg(workdir)
        .arg(group_id.to_string())
        .arg(conflict)
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            warn!(?s, "regex applier exited non-zero");
        }
        Err(e) => {
            warn!(error = %e, "failed to spawn regex applier");
        }
    }

    let candidates = parse_applier_output(output_path);
    let _ = fs::remove_file(output_path);
    Ok(candidates)
}

/// Parse the applier's temp output file into zero, one, or two candidate
/// blocks. An absent or empty file means "no rule applicable"; a partial
/// block (fewer than three lines remaining) is dropped rather than padded
/// with synthesized fields.
fn parse_applier_output(path: &Path) -> Vec<RegexCandidate> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let lines: Vec<&str> = contents.lines().collect();
    let mut candidates = Vec::new();
    let mut chunks = lines.chunks_exact(3);
    for chunk in &mut chunks {
        candidates.push(RegexCandidate {
            regex: chunk[0].to_string(),
            replacement: chunk[1].to_string(),
            produced_resolution: chunk[2].to_string(),
        });
    }
    if !chunks.remainder().is_empty() {
        debug!("applier output had a trailing partial block, dropping it");
    }
    candidates.truncate(2);
    candidates
}

/// Pick the candidate whose produced resolution best matches `expected`,
/// by Jaro-Winkler similarity. Returns `None` if there are no candidates.
pub fn best_candidate<'a>(candidates: &'a [RegexCandidate], expected: &str) -> Option<(&'a RegexCandidate, f64)> {
    candidates
        .iter()
        .map(|c| (c, jaro_winkler(expected, &c.produced_resolution)))
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
}

/// Invoke the regex generator for a whole cluster, appending its wall-clock
/// execution time to the performance log. Returns the classified exit
/// status; `WorkerExit::Fatal` must abort the pipeline per the worker
/// bridge's fatal-exit contract.
pub fn run_generator(
    workdir: &Path,
    group_id: u32,
    cluster_size: usize,
    performance_log_path: &Path,
    _trigger: GeneratorTrigger,
) -> Result<WorkerExit> {
    let start = Instant::now();

    let spawn_result = Command::new(JAVA_BIN)
        .arg("-jar")
        .arg(GENERATOR_JAR)
        .arg(workdir)
        .arg(group_id.to_string())
        .status();

    let elapsed = start.elapsed().as_secs_f64();
    append_performance_row(performance_log_path, group_id, cluster_size, elapsed)?;

    let exit = match spawn_result {
        Ok(status) => classify_exit(status.code()),
        Err(_) => WorkerExit::ExecutableMissing,
    };

    match exit {
        WorkerExit::Success => {}
        WorkerExit::ExecutableMissing => warn!(group_id, "regex generator executable missing"),
        WorkerExit::Fatal(code) => {
            return Err(Error::WorkerFatal(format!(
                "regex generator for group {group_id} exited with status {code}"
            )))
        }
    }

    Ok(exit)
}

fn append_performance_row(path: &Path, group_id: u32, cluster_size: usize, elapsed_secs: f64) -> Result<()> {
    use std::io::Write;

    let needs_header = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if needs_header {
        writeln!(file, "\"Cluster\",\"Cluster Size\",\"Execution time [s]\"")?;
    }
    writeln!(file, "\"{group_id}\",\"{cluster_size}\",\"{elapsed_secs:.6}\"")?;
    Ok(())
}

/// Escape a field for the result/statistics CSV format: wrap in `"`,
/// doubling every embedded `"`.
pub fn escape_csv(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
