use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use approval_sweeper::config;
use approval_sweeper::store;
use approval_sweeper::sweep::{self, SweepSettings};
use approval_sweeper::telemetry;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one auto-approval pass, print the report as JSON and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Evaluate deadlines as of this RFC 3339 instant instead of now
    #[arg(long)]
    now: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init(true);

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let now = match args.now.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --now value: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let backends = store::connect(&cfg.store).await?;
    let settings = SweepSettings::from(&cfg.workflow);

    info!(%now, "running auto-approval pass");
    let report = sweep::run(backends.store.as_ref(), &settings, now).await?;
    if report.failed_steps() > 0 {
        warn!(failed_steps = report.failed_steps(), "some cascade steps failed");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
