use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::driver::{self, PollContext, interval_with_jitter, local_now, sleep_or_shutdown};
use deal_pollers::notify::TelegramNotifier;
use deal_pollers::reporter;
use deal_pollers::seen::SeenStore;
use deal_pollers::sources::slickdeals;
use deal_pollers::types::CycleReport;

#[derive(Parser)]
#[command(name = "sd_poller", about = "Slickdeals RSS deal alerts")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    let config = AppConfig::load_with_env(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    let ctx = PollContext::from_config(config)?;
    let store = SeenStore::new(&ctx.config.slickdeals.seen_file);

    info!(
        "Starting Slickdeals poller: {} feed(s), min likes {}, poll={}s",
        ctx.config.slickdeals.feeds.len(),
        ctx.config.slickdeals.min_likes,
        ctx.config.settings.poll_interval_secs
    );

    loop {
        if let Err(e) = poll_cycle(&ctx, &store).await {
            warn!("Poll cycle error: {e:#}");
        }
        if args.once {
            break;
        }
        let settings = &ctx.config.settings;
        if !sleep_or_shutdown(interval_with_jitter(settings.poll_interval_secs, settings.poll_jitter)).await {
            break;
        }
    }
    Ok(())
}

async fn poll_cycle(ctx: &PollContext<TelegramNotifier>, store: &SeenStore) -> Result<()> {
    let now = local_now();
    let mut seen = store.load(ctx.config.tracker.max_age(), now)?;
    let deals = slickdeals::fetch_all(&ctx.fetcher, &ctx.config.slickdeals).await;

    let mut report = CycleReport::new("sd_poller", Utc::now());
    report.candidates = deals.len();
    driver::notify_new(ctx, store, &mut seen, &deals, slickdeals::format_alert, now)
        .await?
        .add_to(&mut report);
    report.seen_total = seen.len();
    reporter::report_cycle(&report);
    Ok(())
}
