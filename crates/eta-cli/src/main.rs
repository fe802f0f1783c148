//! ETA CLI - Command-line interface
//!
//! Usage:
//!   eta vote [--mode boolean|gradual]
//!   eta pmi [--benchmark]
//!   eta graph-walk [--sweep bias|training]
//!   eta noisy-or <precision> <k>
//!   eta urns <precision> <k> <draws> <candidates> <errors>
//!   eta connect <from> <to>
//!   eta init-db
//!
//! Evaluations read from PostgreSQL unless `--dataset` names a JSON dataset.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use eta_assess::{
    find_entity_connection, noisy_or, urns, Assessor, EntityTrustVoting, GraphWalkEvaluation,
    PathNode, PmiEvaluation, ReportWriter, VotingMode,
};
use eta_core::{
    AppConfig, EntityId, ExtractionStore, LoggingConfig, MemoryStore, PgExtractionStore,
    SweepParameter,
};
use eta_search::{CachedHitCounter, HttpHitCounter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eta")]
#[command(about = "Entity Trust Assessment CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON dataset used instead of the database
    #[arg(short, long, global = true)]
    dataset: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Boolean,
    Gradual,
}

impl From<ModeArg> for VotingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Boolean => VotingMode::Boolean,
            ModeArg::Gradual => VotingMode::Gradual,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run trust voting on every concept
    Vote {
        #[arg(short, long, value_enum, default_value = "boolean")]
        mode: ModeArg,
    },
    /// Evaluate the PMI naive Bayes assessor
    Pmi {
        /// Read precomputed PMI values from the store
        #[arg(long)]
        benchmark: bool,
    },
    /// Evaluate the random graph walk assessor
    GraphWalk {
        /// Swept parameter (bias or training)
        #[arg(long)]
        sweep: Option<SweepParameter>,
    },
    /// Noisy-Or probability
    NoisyOr { precision: f64, k: u32 },
    /// URNS probability
    Urns {
        precision: f64,
        k: u32,
        draws: u64,
        candidates: u64,
        errors: u64,
    },
    /// Find a path between two entities through shared sources
    Connect { from: i64, to: i64 },
    /// Create the database schema
    InitDb,
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("eta_cli={level},eta_assess={level},eta_core={level},eta_search={level}").into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn open_store(
    config: &AppConfig,
    dataset: Option<&PathBuf>,
) -> anyhow::Result<Box<dyn ExtractionStore>> {
    match dataset {
        Some(path) => {
            let store = MemoryStore::from_file(path)
                .with_context(|| format!("loading dataset {}", path.display()))?;
            Ok(Box::new(store))
        }
        None => {
            let store = PgExtractionStore::new(&config.database)
                .await
                .context("connecting to PostgreSQL")?;
            Ok(Box::new(store))
        }
    }
}

async fn run_assessor(assessor: &mut dyn Assessor, config: &AppConfig) -> anyhow::Result<()> {
    let report = assessor.evaluate().await?;
    println!("{}", report.render());

    if let Some(files) = ReportWriter::new(&config.report).write(&report)? {
        println!("CSV report:  {}", files.csv.display());
        println!("Line chart:  {}", files.chart.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::NoisyOr { precision, k } => {
            let p = noisy_or(precision, k);
            println!("Noisy-Or P = {p:.6} ({})", if p > 0.5 { "correct" } else { "incorrect" });
        }
        Commands::Urns {
            precision,
            k,
            draws,
            candidates,
            errors,
        } => {
            let p = urns(precision, k, draws, candidates, errors);
            println!("URNS P = {p:.6} ({})", if p > 0.5 { "correct" } else { "incorrect" });
        }
        Commands::InitDb => {
            let store = PgExtractionStore::new(&config.database).await?;
            store.ensure_schema().await?;
            println!("Schema ready");
        }
        Commands::Vote { mode } => {
            let store = open_store(&config, cli.dataset.as_ref()).await?;
            let voting = EntityTrustVoting::new(store.as_ref(), config.voting.clone());
            let outcomes = voting.run_voting(mode.into()).await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Commands::Connect { from, to } => {
            let store = open_store(&config, cli.dataset.as_ref()).await?;
            match find_entity_connection(store.as_ref(), EntityId(from), EntityId(to)).await? {
                Some(path) => {
                    let hops: Vec<String> = path
                        .iter()
                        .map(|node| match node {
                            PathNode::Entity(id) => format!("entity {id}"),
                            PathNode::Source(id) => format!("source {id}"),
                        })
                        .collect();
                    println!("{}", hops.join(" -> "));
                }
                None => println!("No connection between entity {from} and entity {to}"),
            }
        }
        Commands::Pmi { benchmark } => {
            config.pmi.benchmark |= benchmark;
            let store = open_store(&config, cli.dataset.as_ref()).await?;

            let hits = if config.pmi.benchmark {
                None
            } else {
                Some(CachedHitCounter::new(
                    HttpHitCounter::from_config(&config.search)?,
                    config.search.cache_capacity,
                ))
            };

            let mut evaluation = PmiEvaluation::new(store.as_ref(), config.clone());
            if let Some(hits) = &hits {
                evaluation = evaluation.with_hit_counter(hits);
            }
            run_assessor(&mut evaluation, &config).await?;

            if let Some(hits) = &hits {
                tracing::info!(stats = ?hits.stats(), cached = hits.entry_count(), "Hit count cache");
            }
        }
        Commands::GraphWalk { sweep } => {
            if let Some(sweep) = sweep {
                config.graph_walk.sweep = sweep;
            }
            let store = open_store(&config, cli.dataset.as_ref()).await?;
            let mut evaluation = GraphWalkEvaluation::new(store.as_ref(), config.clone());
            run_assessor(&mut evaluation, &config).await?;
        }
    }

    Ok(())
}
