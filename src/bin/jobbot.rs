use std::path::PathBuf;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::{info, warn};

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::driver::{self, PollContext, interval_with_jitter, local_now, sleep_or_shutdown};
use deal_pollers::notify::TelegramNotifier;
use deal_pollers::reporter;
use deal_pollers::seen::{SeenStore, filter_new};
use deal_pollers::sources::jobs;
use deal_pollers::types::CycleReport;

#[derive(Parser)]
#[command(name = "jobbot", about = "Senior remote job alerts from RemoteOK")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Keep polling instead of exiting after one scan
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    let config = AppConfig::load_with_env(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    let ctx = PollContext::from_config(config)?;
    let store = SeenStore::new(&ctx.config.jobs.seen_file);

    info!(
        "🔥 Job bot: keywords {:?}, min salary {}k, max {} alert(s) per scan",
        ctx.config.jobs.keywords, ctx.config.jobs.min_salary_k, ctx.config.jobs.max_alerts_per_scan
    );

    loop {
        if let Err(e) = scan(&ctx, &store).await {
            warn!("Scan error: {e:#}");
        }
        if !args.watch {
            break;
        }
        let settings = &ctx.config.settings;
        if !sleep_or_shutdown(interval_with_jitter(settings.poll_interval_secs, settings.poll_jitter)).await {
            break;
        }
    }
    Ok(())
}

async fn scan(ctx: &PollContext<TelegramNotifier>, store: &SeenStore) -> Result<()> {
    let cfg = &ctx.config.jobs;
    let now = local_now();
    let mut seen = store.load(TimeDelta::hours(cfg.max_age_hours), now)?;

    let body = ctx.fetcher.fetch_feed(&cfg.url).await?;
    let postings = jobs::parse_jobs(&body, cfg)?;
    info!("🎯 {} filtered senior job(s)", postings.len());

    let mut fresh = filter_new(&postings, &seen);
    fresh.truncate(cfg.max_alerts_per_scan);

    let mut report = CycleReport::new("jobbot", Utc::now());
    report.candidates = postings.len();
    driver::notify_new(ctx, store, &mut seen, &fresh, jobs::format_alert, now)
        .await?
        .add_to(&mut report);
    report.seen_total = seen.len();
    reporter::report_cycle(&report);
    Ok(())
}
