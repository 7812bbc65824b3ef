use colored::Colorize;

use rerecall::pipeline::PipelineSummary;
use rerecall::recluster::ReclusterOutcome;
use rerecall::{config::Config, EngineStatus};

const LOGO: &str = r#"
 _ __ ___ _ __ ___  ___ __ _| | |
| '__/ _ \ '__/ _ \/ __/ _` | | |
| | |  __/ | |  __/ (_| (_| | | |
|_|  \___|_|  \___|\___\__,_|_|_|
"#;

pub fn print_logo() {
    for line in LOGO.trim_start_matches('\n').lines() {
        println!("{}", line.bold().cyan());
    }
}

pub fn print_status(status: &EngineStatus) {
    println!("{}", "Engine status".bold());
    println!("  workdir:                  {}", status.workdir);
    println!("  clusters:                 {}", status.cluster_count);
    println!("  records:                  {}", status.total_records);
    println!(
        "  avg intra-similarity:     {:.4}",
        status.average_intra_similarity
    );
}

pub fn print_config(config: &Config) {
    println!("{}", "Resolved configuration".bold());
    println!("  workdir:            {}", config.workdir.display());
    println!("  cluster index:      {}", config.cluster_index_path.display());
    println!("  statistics log:     {}", config.statistics_log_path.display());
    println!("  performance log:    {}", config.performance_log_path.display());
    println!("  result csv:         {}", config.regex_result_path.display());
    println!("  similarity threshold: {:.2}", config.similarity_threshold);
    println!("  linkage:            {:?}", config.linkage);
}

pub fn print_summary(summary: &PipelineSummary) {
    println!("{}", "Pipeline run complete".bold().green());
    println!("  inserted:            {}", summary.inserted);
    println!("  duplicates:          {}", summary.duplicates);
    println!("  rejected (multiline):{}", summary.rejected_multiline);
    println!("  reclusters attempted:{}", summary.reclusters_attempted);
    println!("  reclusters accepted: {}", summary.reclusters_accepted);
    println!("  worker failures:     {}", summary.worker_failures);
}

pub fn print_recluster_outcome(outcome: &ReclusterOutcome) {
    if outcome.accepted {
        println!(
            "{} old avg intra-similarity {:.4} -> new {:.4}",
            "accepted:".bold().green(),
            outcome.old_avg_intra,
            outcome.new_avg_intra
        );
    } else {
        println!(
            "{} old avg intra-similarity {:.4}, new {:.4} did not improve",
            "rejected:".bold().yellow(),
            outcome.old_avg_intra,
            outcome.new_avg_intra
        );
    }
}
