use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod detectors;
mod error;
mod export;
mod facts;
mod flags;
mod models;
mod panel;
mod pipeline;
mod report;
mod risk;
mod window;

use config::{PipelineConfig, ValidatedConfig};
use models::{FactRecord, ProviderSnapshot};

#[derive(Parser)]
#[command(name = "provider-risk")]
#[command(about = "Longitudinal anomaly and risk scoring for claims providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import daily provider facts from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score providers across snapshot dates
    Score {
        #[command(flatten)]
        input: InputArgs,
        /// Write the scored panel to this CSV file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Store the scored panel in Postgres under a new run id
        #[arg(long)]
        persist: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report for the latest snapshot
    Report {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print one provider's risk history across snapshots
    History {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        provider: String,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Facts CSV; facts are read from Postgres when omitted
    #[arg(long)]
    facts: Option<PathBuf>,
    /// Pipeline configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Snapshot dates (YYYY-MM-DD); defaults to every month-end in the fact range
    #[arg(long = "as-of", value_parser = parse_as_of)]
    as_of: Vec<NaiveDate>,
}

fn parse_as_of(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("invalid date `{raw}`: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} facts from {}.", csv.display());
        }
        Commands::Score {
            input,
            out,
            persist,
            limit,
        } => {
            let (raw_config, config) = load_config(input.config.as_deref())?;
            let pool = if persist || input.facts.is_none() {
                Some(connect().await?)
            } else {
                None
            };
            let panel = run_pipeline(&input, &config, pool.as_ref()).await?;

            if let Some(path) = out {
                export::write_panel_path(
                    &path,
                    &panel,
                    &config.windows,
                    &detectors::registry(&config.detectors),
                )
                .with_context(|| format!("failed to write panel to {}", path.display()))?;
                println!("Panel written to {}.", path.display());
            }
            if let Some(pool) = pool.as_ref().filter(|_| persist) {
                let run_id = db::persist_run(pool, &raw_config, &panel).await?;
                println!("Panel stored as run {run_id}.");
            }

            let Some((as_of, rows)) = report::latest_snapshot(&panel) else {
                println!("No providers with activity in the scored range.");
                return Ok(());
            };

            println!("Top providers by risk score as of {as_of}:");
            for row in rows.iter().take(limit) {
                println!(
                    "- {} score {:.3} (raw {:.3}) with {} flags, {} days since last claim",
                    row.provider_id,
                    row.provider_risk_score,
                    row.provider_risk_raw,
                    row.anomaly_total_flags,
                    row.lifetime.days_since_last
                );
            }
        }
        Commands::Report { input, out, limit } => {
            let (_, config) = load_config(input.config.as_deref())?;
            let pool = match input.facts {
                Some(_) => None,
                None => Some(connect().await?),
            };
            let panel = run_pipeline(&input, &config, pool.as_ref()).await?;
            let report = report::build_report(
                &panel,
                &detectors::registry(&config.detectors),
                config.trend_window,
                limit,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::History { input, provider } => {
            let (_, config) = load_config(input.config.as_deref())?;
            let pool = match input.facts {
                Some(_) => None,
                None => Some(connect().await?),
            };
            let panel = run_pipeline(&input, &config, pool.as_ref()).await?;
            print!("{}", report::provider_history(&panel, &provider, config.trend_window));
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Reads and validates the configuration before any facts are touched.
fn load_config(path: Option<&Path>) -> anyhow::Result<(PipelineConfig, ValidatedConfig)> {
    let raw = match path {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let validated = raw.validate().context("invalid pipeline configuration")?;
    Ok((raw, validated))
}

async fn run_pipeline(
    input: &InputArgs,
    config: &ValidatedConfig,
    pool: Option<&PgPool>,
) -> anyhow::Result<Vec<ProviderSnapshot>> {
    let latest_as_of = input.as_of.iter().max().copied();
    let facts: Vec<FactRecord> = match (&input.facts, pool) {
        (Some(path), _) => facts::read_facts_path(path)
            .with_context(|| format!("failed to read facts from {}", path.display()))?,
        (None, Some(pool)) => db::fetch_facts(pool, latest_as_of).await?,
        (None, None) => anyhow::bail!("no fact source: pass --facts or set DATABASE_URL"),
    };

    let snapshot_dates = if input.as_of.is_empty() {
        panel::month_end_snapshots(&facts)
    } else {
        input.as_of.clone()
    };
    info!(
        facts = facts.len(),
        first = ?snapshot_dates.first(),
        last = ?snapshot_dates.last(),
        "facts loaded"
    );

    Ok(pipeline::score_panel(&facts, &snapshot_dates, config)?)
}
