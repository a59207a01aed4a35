use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::driver::{self, PollContext, interval_with_jitter, local_now, sleep_or_shutdown};
use deal_pollers::fetch::pause;
use deal_pollers::notify::{Notifier, TelegramNotifier};
use deal_pollers::price::PriceTracker;
use deal_pollers::reporter;
use deal_pollers::sources::amazon::{self, WatchItem};
use deal_pollers::types::{CycleReport, ItemOutcome};

#[derive(Parser)]
#[command(name = "price_tracker", about = "Amazon watchlist price tracker")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single pass over the watchlist and exit
    #[arg(long)]
    once: bool,

    /// Seconds between passes (overrides amazon.poll_interval_secs)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Fraction of the interval used as ± jitter (overrides amazon.poll_jitter)
    #[arg(long)]
    jitter: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    if let Some(jitter) = args.jitter {
        if !(0.0..=1.0).contains(&jitter) {
            anyhow::bail!("--jitter must be between 0 and 1");
        }
    }

    let mut config = AppConfig::load_with_env(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    if let Some(secs) = args.interval_secs {
        config.amazon.poll_interval_secs = secs;
    }
    if let Some(jitter) = args.jitter {
        config.amazon.poll_jitter = jitter;
    }
    let ctx = PollContext::from_config(config)?;
    let amazon_cfg = &ctx.config.amazon;

    let items = amazon::load_watchlist(&amazon_cfg.watchlist_file)?;
    if items.is_empty() {
        info!("No Amazon items in watchlist.");
        return Ok(());
    }
    let sellers = amazon::load_valid_sellers(&amazon_cfg.valid_sellers_file)?;
    let mut tracker = PriceTracker::load(&amazon_cfg.state_file, &ctx.config.tracker);
    debug!("Price state in {}", tracker.path().display());

    let interval = amazon_cfg.poll_interval_secs;
    info!(
        "🚀 Amazon tracker: {} item(s) every {:.1}hr",
        items.len(),
        interval as f64 / 3600.0
    );

    loop {
        if let Err(e) = run_pass(&ctx, &mut tracker, &items, &sellers).await {
            warn!("Pass error: {e:#}");
        }
        if args.once {
            break;
        }
        if !sleep_or_shutdown(interval_with_jitter(interval, amazon_cfg.poll_jitter)).await {
            break;
        }
    }
    Ok(())
}

async fn run_pass(
    ctx: &PollContext<TelegramNotifier>,
    tracker: &mut PriceTracker,
    items: &[WatchItem],
    sellers: &[String],
) -> Result<()> {
    let amazon_cfg = &ctx.config.amazon;
    info!("🕐 Polling {} item(s)", items.len());

    let mut order: Vec<&WatchItem> = items.iter().collect();
    order.shuffle(&mut rand::thread_rng());

    let mut report = CycleReport::new("price_tracker", Utc::now());
    report.candidates = items.len();
    for (i, item) in order.iter().enumerate() {
        if i > 0 {
            let (min, max) = amazon_cfg.item_pause_secs;
            pause(min as f64, max as f64).await;
        }
        info!("Progress: {:.0}%", (i + 1) as f64 / items.len() as f64 * 100.0);
        let result = driver::check_item(ctx, tracker, item, sellers, Utc::now()).await;
        match result.alert_delivered {
            Some(true) => report.sent += 1,
            Some(false) => report.failed += 1,
            None => {}
        }
        report.items.push(ItemOutcome {
            key: item.url.clone(),
            check: result.check,
        });
    }

    tracker.save()?;
    report.seen_total = tracker.active_items();

    if amazon_cfg.send_summary {
        let summary = amazon::format_summary(
            tracker.active_items(),
            items.len(),
            amazon_cfg.poll_interval_secs,
            local_now(),
        );
        if let Err(e) = ctx.notifier.send(&summary).await {
            warn!("Summary send failed: {e:#}");
        }
    }
    reporter::report_cycle(&report);
    Ok(())
}
