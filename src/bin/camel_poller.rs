use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::driver::{self, PollContext, interval_with_jitter, local_now, sleep_or_shutdown};
use deal_pollers::id_store::{IdStore, is_asin};
use deal_pollers::notify::{TelegramNotifier, truncate_chars};
use deal_pollers::price::PriceTracker;
use deal_pollers::reporter;
use deal_pollers::seen::{SeenStore, filter_new};
use deal_pollers::sources::{amazon, camel};
use deal_pollers::types::{CycleReport, DealListing};

#[derive(Parser)]
#[command(name = "camel_poller", about = "CamelCamelCamel top drops alerts")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,

    /// Poll the RSS feed instead of the top drops page
    #[arg(long)]
    rss: bool,
}

enum Mode {
    Page {
        store: SeenStore,
        tracker: PriceTracker,
    },
    Feed {
        store: IdStore,
        sellers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    let config = AppConfig::load_with_env(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    let ctx = PollContext::from_config(config)?;
    let camel = &ctx.config.camel;

    let mut mode = if args.rss {
        info!("Starting Camel RSS poller: {}", camel.rss_url);
        let sellers = if camel.rss_enrich {
            amazon::load_valid_sellers(&ctx.config.amazon.valid_sellers_file)?
        } else {
            Vec::new()
        };
        Mode::Feed {
            store: IdStore::new(&camel.rss_seen_file).with_validator(is_asin),
            sellers,
        }
    } else {
        info!(
            "Starting Camel top drops poller: {} (critical ≥{}% or {} keyword(s))",
            camel.url,
            camel.min_drop_pct,
            camel.keywords.len()
        );
        Mode::Page {
            store: SeenStore::new(&camel.seen_file),
            tracker: PriceTracker::load(&camel.state_file, &ctx.config.tracker),
        }
    };

    loop {
        let result = match &mut mode {
            Mode::Page { store, tracker } => poll_page(&ctx, store, tracker).await,
            Mode::Feed { store, sellers } => poll_feed(&ctx, store, sellers).await,
        };
        if let Err(e) = result {
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

async fn poll_page(
    ctx: &PollContext<TelegramNotifier>,
    store: &SeenStore,
    tracker: &mut PriceTracker,
) -> Result<()> {
    let camel = &ctx.config.camel;
    let now = local_now();
    let mut seen = store.load(ctx.config.tracker.max_age(), now)?;

    let html = ctx.fetcher.fetch_page(&camel.url).await?;
    if html.len() < camel.min_page_len {
        warn!("Short HTML ({} bytes), skipping cycle", html.len());
        return Ok(());
    }
    let deals = camel::parse_top_drops(&html);
    info!("Parsed {} deal(s)", deals.len());

    let observed_at = Utc::now();
    for deal in &deals {
        if let Some(price) = deal.price {
            tracker.record_seen(camel::asin_of(deal), &deal.title, price, observed_at);
        }
    }
    tracker.save()?;

    let fresh = filter_new(&deals, &seen);
    let (critical, regular): (Vec<DealListing>, Vec<DealListing>) = fresh
        .into_iter()
        .partition(|d| camel::is_critical(d, camel.min_drop_pct, &camel.keywords));
    for (i, deal) in deals.iter().enumerate() {
        debug!(
            "{:2}. {:<60} {:>25} {}",
            i + 1,
            truncate_chars(&deal.title, 60),
            deal.price_change.as_deref().unwrap_or(""),
            deal.link_url
        );
    }

    let mut report = CycleReport::new("camel_poller", observed_at);
    report.candidates = deals.len();
    if !critical.is_empty() {
        let digest = camel::format_critical_digest(&critical, camel.min_drop_pct);
        driver::notify_digest(ctx, store, &mut seen, &critical, &digest, now)
            .await?
            .add_to(&mut report);
    }
    driver::notify_new(ctx, store, &mut seen, &regular, camel::format_alert, now)
        .await?
        .add_to(&mut report);
    report.seen_total = seen.len();
    reporter::report_cycle(&report);
    Ok(())
}

async fn poll_feed(
    ctx: &PollContext<TelegramNotifier>,
    store: &IdStore,
    sellers: &[String],
) -> Result<()> {
    let mut seen = store.load()?;
    let xml = ctx.fetcher.fetch_feed(&ctx.config.camel.rss_url).await?;
    let deals = camel::parse_feed(&xml)?;
    info!("Parsed {} deal(s) from RSS", deals.len());

    let mut fresh = filter_new(&deals, &seen);
    if ctx.config.camel.rss_enrich {
        for deal in &mut fresh {
            let url = camel::amazon_url(camel::asin_of(deal));
            match ctx.fetcher.fetch_page(&url).await {
                Ok(html) => camel::enrich_from_buybox(deal, &amazon::extract_buybox(&html, sellers)),
                Err(e) => warn!("Lookup failed for {url}: {e:#}"),
            }
        }
    }

    let mut report = CycleReport::new("camel_poller", Utc::now());
    report.candidates = deals.len();
    driver::notify_new(ctx, store, &mut seen, &fresh, camel::format_feed_alert, local_now())
        .await?
        .add_to(&mut report);
    report.seen_total = seen.len();
    reporter::report_cycle(&report);
    Ok(())
}
