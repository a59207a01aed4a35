//! Probe: fetch one source and print what the extractor makes of it.
//!
//! Nothing is sent and no store is read or written. Candidates are printed
//! as JSON lines on stdout, diagnostics go to stderr.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

use deal_pollers::config::{AppConfig, CONFIG_PATH};
use deal_pollers::fetch::Fetcher;
use deal_pollers::sources::{amazon, camel, jobs, slickdeals, woot};
use deal_pollers::types::{Listing, Observation, PricedItem};

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Slickdeals,
    Woot,
    Camel,
    CamelRss,
    Amazon,
    Jobs,
}

#[derive(Parser)]
#[command(name = "probe_source", about = "Fetch and parse one source without notifying")]
struct Args {
    #[arg(value_enum)]
    source: Source,

    /// Page to fetch instead of the configured one (required for amazon)
    #[arg(long)]
    url: Option<String>,

    /// Path to the TOML config file; defaults are used when it is missing
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    deal_pollers::telemetry::init();
    let args = Args::parse();

    let config = if args.config.exists() {
        AppConfig::load(&args.config)?
    } else {
        info!("{} not found, using defaults", args.config.display());
        toml::from_str("[telegram]")?
    };
    let fetcher = Fetcher::new(&config.settings.fetch)?;
    let start = Instant::now();

    let listings: Vec<Listing> = match args.source {
        Source::Slickdeals => {
            let mut sd = config.slickdeals.clone();
            if let Some(url) = args.url {
                sd.feeds = vec![url];
            }
            slickdeals::fetch_all(&fetcher, &sd)
                .await
                .into_iter()
                .map(Listing::Deal)
                .collect()
        }
        Source::Woot => {
            let url = args.url.unwrap_or(config.woot.url);
            let html = fetcher.fetch_page(&url).await?;
            info!("Fetched {} bytes", html.len());
            woot::parse_sellout(&html).into_iter().map(Listing::Deal).collect()
        }
        Source::Camel => {
            let url = args.url.unwrap_or(config.camel.url);
            let html = fetcher.fetch_page(&url).await?;
            info!("Fetched {} bytes", html.len());
            camel::parse_top_drops(&html)
                .into_iter()
                .map(|d| {
                    let critical =
                        camel::is_critical(&d, config.camel.min_drop_pct, &config.camel.keywords);
                    info!("{} critical={critical}", d.key);
                    Listing::Deal(d)
                })
                .collect()
        }
        Source::CamelRss => {
            let url = args.url.unwrap_or(config.camel.rss_url);
            let xml = fetcher.fetch_feed(&url).await?;
            camel::parse_feed(&xml)?.into_iter().map(Listing::Deal).collect()
        }
        Source::Amazon => {
            let Some(url) = args.url else {
                anyhow::bail!("--url is required for the amazon source");
            };
            let Some(asin) = amazon::extract_asin(&url) else {
                anyhow::bail!("no ASIN in {url}");
            };
            let sellers = amazon::load_valid_sellers(&config.amazon.valid_sellers_file)?;
            let offers = fetcher.fetch_page(&amazon::offers_url(asin)).await.ok();
            let product = fetcher.fetch_page(&url).await.ok();
            let observed = amazon::observe(offers.as_deref(), product.as_deref(), &sellers);
            info!("Observation: {:?} from {:?}", observed.observation, observed.source);
            let price = match observed.observation {
                Observation::Price(p) => Some(p),
                _ => None,
            };
            vec![Listing::Priced(PricedItem {
                key: url.clone(),
                name: observed.name.unwrap_or_default(),
                url,
                price,
            })]
        }
        Source::Jobs => {
            let url = args.url.unwrap_or(config.jobs.url.clone());
            let body = fetcher.fetch_feed(&url).await?;
            jobs::parse_jobs(&body, &config.jobs)?
                .into_iter()
                .map(Listing::Job)
                .collect()
        }
    };

    for listing in &listings {
        println!("{}", serde_json::to_string(listing)?);
    }
    info!("{} candidate(s) in {:?}", listings.len(), start.elapsed());
    Ok(())
}
