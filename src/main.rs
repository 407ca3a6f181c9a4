//! # Topic Timeline CLI (`tl`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tl run <topic>` | Fetch, merge, and persist a timeline |
//! | `tl plan <topic>` | Print the monthly queries without calling the service |
//! | `tl normalize <file>` | Parse a saved raw reply into event records |
//! | `tl export` | Rebuild the CSV from persisted JSON arrays |
//!
//! ## Examples
//!
//! ```bash
//! # Two years of monthly queries, five in flight at a time
//! tl run "中菲南海冲突" --start 2012-01 --end 2013-12 --config ./config/tl.toml
//!
//! # One open-ended query
//! tl run "中菲南海冲突"
//!
//! # Debug a reply that failed to parse
//! tl normalize ./reply.txt
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use topic_timeline::client::SseAnswerClient;
use topic_timeline::config::{self, Config};
use topic_timeline::export;
use topic_timeline::normalize::normalize;
use topic_timeline::orchestrate::Orchestrator;
use topic_timeline::planner::{self, NO_RANGE};
use topic_timeline::progress::ProgressMode;

/// Topic Timeline CLI: build a sourced event timeline for a topic.
#[derive(Parser)]
#[command(
    name = "tl",
    about = "Topic Timeline: build chronological, source-cited event timelines",
    version,
    long_about = "Splits a month range into one query per month, asks a natural-language \
    answer service about the topic for each month concurrently, normalizes the loosely \
    structured replies into dated events, and merges them into one timeline with a single \
    consistent reference list."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tl.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Emit logs as JSON lines instead of plain text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and merge a timeline, then write JSON and CSV output.
    Run {
        /// Subject of every generated query.
        topic: String,

        /// First month (YYYY-MM), or `-1` for a single open-ended query.
        #[arg(long, default_value = NO_RANGE, allow_hyphen_values = true)]
        start: String,

        /// Last month (YYYY-MM), inclusive.
        #[arg(long, default_value = "2025-10")]
        end: String,

        /// Output directory. Overrides `[output].dir`.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Skip the CSV export.
        #[arg(long)]
        no_csv: bool,
    },

    /// Print the planned queries without contacting the service.
    Plan {
        topic: String,
        #[arg(long, default_value = NO_RANGE, allow_hyphen_values = true)]
        start: String,
        #[arg(long, default_value = "2025-10")]
        end: String,
    },

    /// Normalize a saved raw reply and print the records as JSON.
    Normalize {
        /// File holding the raw reply text.
        path: PathBuf,
    },

    /// Rebuild the CSV from `events.json` and `references.json`.
    Export {
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        references: PathBuf,
        /// CSV file to write.
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Commands that don't require config
    match &cli.command {
        Commands::Plan { topic, start, end } => {
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            let units = planner::plan_with(&cfg.query, topic, start, end)?;
            for unit in &units {
                let period = if unit.period_prefix.is_empty() {
                    "-"
                } else {
                    unit.period_prefix.as_str()
                };
                println!("{}\t{}\t{}", unit.index, period, unit.query_text);
            }
            return Ok(());
        }
        Commands::Normalize { path } => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let records = normalize(&raw)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }
        Commands::Export {
            events,
            references,
            out,
        } => {
            export::run_export(events, references, out)?;
            return Ok(());
        }
        Commands::Run { .. } => {}
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Run {
        topic,
        start,
        end,
        out,
        no_csv,
    } = cli.command
    {
        let service = Arc::new(SseAnswerClient::new(&cfg.service)?);
        let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
        let orchestrator = Orchestrator::new(service, &cfg).with_progress(progress.reporter());

        let timeline = orchestrator.run(&topic, &start, &end).await?;

        let dir = out.unwrap_or_else(|| cfg.output.dir.clone());
        let paths = export::write_timeline(&dir, &topic, &timeline, !no_csv)?;

        println!("run {}", topic);
        println!("  events: {}", timeline.events.len());
        println!("  references: {}", timeline.references.len());
        println!("  degraded units: {}", timeline.degraded_units.len());
        for unit in &timeline.degraded_units {
            println!("    #{} {}", unit.index, unit.period_prefix);
        }
        println!("  events file: {}", paths.events.display());
        println!("  references file: {}", paths.references.display());
        if let Some(csv) = &paths.csv {
            println!("  csv file: {}", csv.display());
        }
        println!("ok");
    }

    Ok(())
}
