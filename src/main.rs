use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use approval_sweeper::config;
use approval_sweeper::pricing::{ChatCompletionClient, CompletionService};
use approval_sweeper::server::{self, AppState};
use approval_sweeper::store;
use approval_sweeper::sweep::{self, SweepSettings};
use approval_sweeper::telemetry;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init(false);

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let backends = store::connect(&cfg.store).await?;
    let pricing: Option<Arc<dyn CompletionService>> = match &cfg.pricing {
        Some(p) => Some(Arc::new(ChatCompletionClient::from_config(p)?)),
        None => {
            warn!("pricing assistant not configured; /pricing-suggestion will answer 503");
            None
        }
    };

    let state = Arc::new(AppState {
        store: backends.store,
        users: backends.users,
        pricing,
        settings: SweepSettings::from(&cfg.workflow),
    });

    if cfg.app.sweep_interval_seconds > 0 {
        let period = Duration::from_secs(cfg.app.sweep_interval_seconds);
        tokio::spawn(sweep::run_periodically(
            state.store.clone(),
            state.settings.clone(),
            period,
        ));
    }

    info!("starting approval sweeper");
    server::serve(state, &cfg.app.bind_addr).await
}
