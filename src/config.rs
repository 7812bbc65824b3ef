use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::assignment::Linkage;
use crate::error::Error;

/// Fixed artifact filenames under the working directory.
const CLUSTER_INDEX_FILE: &str = "conflict_index.json";
const STRING_REPLACE_FILE: &str = "string_replace.txt";
const REGEX_RESULT_FILE: &str = "regex_replace_result.txt";
const PERFORMANCE_FILE: &str = "performance.txt";
const STATISTICS_FILE: &str = "statistics.txt";

/// Resolved configuration: the working directory plus every artifact path
/// derived from it by concatenation.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub workdir: PathBuf,
    pub cluster_index_path: PathBuf,
    pub string_replace_path: PathBuf,
    pub regex_result_path: PathBuf,
    pub performance_log_path: PathBuf,
    pub statistics_log_path: PathBuf,
    pub similarity_threshold: f64,
    pub linkage: Linkage,
}

impl Config {
    /// Load configuration from `config.properties` under `project_root`.
    ///
    /// The file holds exactly one line, `workdir=<path>`; the trailing
    /// newline is stripped.
    pub fn load(project_root: &Path) -> Result<Self, Error> {
        let config_path = project_root.join("config.properties");
        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            Error::Config(format!(
                "failed to read {}: {e}",
                config_path.display()
            ))
        })?;

        let workdir = parse_workdir(&contents)?;
        let config = Self::from_workdir(workdir);
        config.validate()?;
        Ok(config)
    }

    /// Build a `Config` directly from a working directory, deriving every
    /// artifact path and leaving linkage/threshold at their default values.
    pub fn from_workdir(workdir: PathBuf) -> Self {
        Self {
            cluster_index_path: workdir.join(CLUSTER_INDEX_FILE),
            string_replace_path: workdir.join(STRING_REPLACE_FILE),
            regex_result_path: workdir.join(REGEX_RESULT_FILE),
            performance_log_path: workdir.join(PERFORMANCE_FILE),
            statistics_log_path: workdir.join(STATISTICS_FILE),
            similarity_threshold: 0.80,
            linkage: Linkage::Average,
            workdir,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.workdir.as_os_str().is_empty() {
            return Err(Error::Config("workdir must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "similarity_threshold ({}) must be in [0.0, 1.0]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    /// Archive path for a rejected-then-retried index, numbered sequentially
    /// (`conflict_index1.json`, `conflict_index2.json`, ...).
    pub fn archive_path(&self, n: usize) -> PathBuf {
        self.workdir.join(format!("conflict_index{n}.json"))
    }
}

fn parse_workdir(contents: &str) -> Result<PathBuf, Error> {
    let line = contents
        .lines()
        .next()
        .ok_or_else(|| Error::Config("config.properties is empty".into()))?;

    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("malformed config line: '{line}'")))?;

    if key.trim() != "workdir" {
        return Err(Error::Config(format!(
            "expected key 'workdir', found '{}'",
            key.trim()
        )));
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config("workdir value must not be empty".into()));
    }

    Ok(PathBuf::from(value))
}
