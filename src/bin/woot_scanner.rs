use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::driver::{self, PollContext, local_now, random_interval, sleep_or_shutdown};
use deal_pollers::id_store::IdStore;
use deal_pollers::notify::TelegramNotifier;
use deal_pollers::reporter;
use deal_pollers::sources::woot;
use deal_pollers::types::CycleReport;

#[derive(Parser)]
#[command(name = "woot_scanner", about = "Woot sellout clearance scanner")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single scan and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    let mut config = AppConfig::load_with_env(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    config.settings.message_delay_ms = config.woot.message_delay_secs * 1000;
    let ctx = PollContext::from_config(config)?;
    let store = IdStore::new(&ctx.config.woot.seen_file);

    info!(
        "Starting Woot scanner: {} every {}-{}s",
        ctx.config.woot.url, ctx.config.woot.interval_min_secs, ctx.config.woot.interval_max_secs
    );

    loop {
        if let Err(e) = scan(&ctx, &store).await {
            warn!("Scan error: {e:#}");
        }
        if args.once {
            break;
        }
        let woot = &ctx.config.woot;
        if !sleep_or_shutdown(random_interval(woot.interval_min_secs, woot.interval_max_secs)).await {
            break;
        }
    }
    Ok(())
}

async fn scan(ctx: &PollContext<TelegramNotifier>, store: &IdStore) -> Result<()> {
    let mut seen = store.load()?;
    let html = ctx.fetcher.fetch_page(&ctx.config.woot.url).await?;
    let deals = woot::parse_sellout(&html);
    if deals.is_empty() {
        warn!("No offers found ({} bytes of HTML)", html.len());
    }

    let mut report = CycleReport::new("woot_scanner", Utc::now());
    report.candidates = deals.len();
    driver::notify_new(ctx, store, &mut seen, &deals, woot::format_alert, local_now())
        .await?
        .add_to(&mut report);
    report.seen_total = seen.len();
    reporter::report_cycle(&report);
    Ok(())
}
