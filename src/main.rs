mod format;

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;

use rerecall::config::Config;
use rerecall::Engine;

/// rerecall -- reuse-recorded-resolution clustering and recall engine
#[derive(Parser)]
#[command(name = "rerecall", about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Project root containing config.properties (defaults to current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over an input dataset
    Run(RunArgs),

    /// Force a reclustering attempt regardless of the usual preconditions
    Recluster(ReclusterArgs),

    /// Show cluster counts and average intra-similarity
    Status(StatusArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to the input dataset (mapping of group name to conflict records)
    dataset: PathBuf,
}

#[derive(Parser)]
struct ReclusterArgs {}

#[derive(Parser)]
struct StatusArgs {}

#[derive(Parser)]
struct ConfigArgs {}

/// Run the main logic, returning Result for error handling. Errors are
/// printed to stderr.
fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    rerecall::logging::init(cli.verbose)?;

    let cwd = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let config = Config::load(&cwd)?;
    let json = cli.json;
    let engine = Engine::open_with_config(config.clone());

    match cli.command {
        Some(Commands::Run(args)) => {
            let cancel = set_up_sigint();
            let summary = engine.run(&args.dataset)?;
            if cancel.load(std::sync::atomic::Ordering::Relaxed) {
                eprintln!("{}", "interrupted, flushed partial results".yellow());
            }
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &summary)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_summary(&summary);
            }
        }
        Some(Commands::Recluster(_args)) => {
            let outcome = engine.force_recluster()?;
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &outcome)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_recluster_outcome(&outcome);
            }
        }
        Some(Commands::Status(_args)) => {
            let status = engine.status()?;
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &status)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_status(&status);
            }
        }
        Some(Commands::Config(_args)) => {
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &config)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_config(&config);
            }
        }
        None => {
            format::print_logo();
            println!("{}", "  Run `rerecall --help` for usage information.".dimmed());
        }
    }

    Ok(())
}

/// Install a SIGINT handler that records that an interrupt arrived; the
/// pipeline itself is synchronous and has no cooperative yield points, so
/// this can only report the interrupt after the current record finishes.
fn set_up_sigint() -> std::sync::Arc<std::sync::atomic::AtomicBool> {
    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag_clone = flag.clone();
    let _ = ctrlc_handler(move || {
        flag_clone.store(true, std::sync::atomic::Ordering::Relaxed);
    });
    flag
}

fn ctrlc_handler(action: impl Fn() + Send + 'static) -> std::io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::spawn(move || {
        rt.block_on(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                action();
            }
        });
    });
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}
