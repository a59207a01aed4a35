use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::TimeDelta;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{
    CAMEL_RSS_URL, CAMEL_TOP_DROPS_URL, REMOTEOK_API_URL, SLICKDEALS_FEEDS, WOOT_SELLOUT_URL,
};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Upper bound for any `*_hours` setting (100 years).
pub const MAX_HOURS: i64 = 24 * 365 * 100;

/// Environment variables that override the `[telegram]` section.
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub slickdeals: SlickdealsConfig,
    #[serde(default)]
    pub woot: WootConfig,
    #[serde(default)]
    pub camel: CamelConfig,
    #[serde(default)]
    pub amazon: AmazonConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Notification endpoint credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Extra destinations that receive the same messages.
    #[serde(default)]
    pub extra_chat_ids: Vec<String>,
}

impl TelegramConfig {
    /// Primary chat followed by any extra chats.
    pub fn chat_ids(&self) -> Vec<String> {
        std::iter::once(self.chat_id.clone())
            .chain(self.extra_chat_ids.iter().cloned())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Runtime settings shared by every poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Fraction of the interval used as ± jitter (0.1 = ±10%).
    #[serde(default)]
    pub poll_jitter: f64,
    /// Pause between consecutive notifications.
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
    /// What to do with an item whose notification failed.
    #[serde(default)]
    pub send_failure_policy: SendFailurePolicy,
    #[serde(default)]
    pub fetch: FetchSettings,
}

fn default_poll_interval() -> u64 {
    180
}

fn default_message_delay_ms() -> u64 {
    500
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_jitter: 0.0,
            message_delay_ms: default_message_delay_ms(),
            send_failure_policy: SendFailurePolicy::default(),
            fetch: FetchSettings::default(),
        }
    }
}

/// Whether a failed send still marks the item as seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Commit regardless of the send outcome (an alert may be lost).
    #[default]
    MarkSeen,
    /// Leave the item unseen so the next cycle sends it again.
    Retry,
}

/// HTTP fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed user agent; a desktop browser UA is rotated when empty.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            user_agent: None,
        }
    }
}

/// Seen/State tracker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Seen records older than this are purged on load.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    /// Consecutive no-price polls before an issue message.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
    /// Minimum absolute price change that triggers an alert.
    #[serde(default = "default_epsilon")]
    pub price_epsilon: Decimal,
}

fn default_max_age_hours() -> i64 {
    24
}

fn default_fail_threshold() -> u32 {
    6
}

fn default_cooldown_hours() -> i64 {
    24
}

fn default_epsilon() -> Decimal {
    dec!(0.01)
}

impl TrackerConfig {
    /// Expiry window for seen records.
    pub fn max_age(&self) -> TimeDelta {
        TimeDelta::hours(self.max_age_hours)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            fail_threshold: default_fail_threshold(),
            cooldown_hours: default_cooldown_hours(),
            price_epsilon: default_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlickdealsConfig {
    #[serde(default = "default_sd_feeds")]
    pub feeds: Vec<String>,
    #[serde(default = "default_sd_seen_file")]
    pub seen_file: PathBuf,
    #[serde(default)]
    pub min_likes: u32,
    /// Referral user id; links are left untouched when empty.
    #[serde(default)]
    pub referral_user_id: String,
    #[serde(default = "default_sd_junk")]
    pub junk_keywords: Vec<String>,
    /// Only the newest N items of each feed are considered.
    #[serde(default = "default_sd_per_feed")]
    pub max_items_per_feed: usize,
}

fn default_sd_feeds() -> Vec<String> {
    SLICKDEALS_FEEDS.iter().map(|s| s.to_string()).collect()
}

fn default_sd_seen_file() -> PathBuf {
    PathBuf::from("sd_seen_urls.txt")
}

fn default_sd_junk() -> Vec<String> {
    ["Sample", "Survey", "Giveaway", "Sweepstakes", "YMMV"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sd_per_feed() -> usize {
    20
}

impl Default for SlickdealsConfig {
    fn default() -> Self {
        Self {
            feeds: default_sd_feeds(),
            seen_file: default_sd_seen_file(),
            min_likes: 0,
            referral_user_id: String::new(),
            junk_keywords: default_sd_junk(),
            max_items_per_feed: default_sd_per_feed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WootConfig {
    #[serde(default = "default_woot_url")]
    pub url: String,
    #[serde(default = "default_woot_seen_file")]
    pub seen_file: PathBuf,
    #[serde(default = "default_woot_interval_min")]
    pub interval_min_secs: u64,
    #[serde(default = "default_woot_interval_max")]
    pub interval_max_secs: u64,
    /// Delay between messages so link previews can render.
    #[serde(default = "default_woot_message_delay")]
    pub message_delay_secs: u64,
}

fn default_woot_url() -> String {
    WOOT_SELLOUT_URL.to_string()
}

fn default_woot_seen_file() -> PathBuf {
    PathBuf::from("seen_woot_ids.txt")
}

fn default_woot_interval_min() -> u64 {
    45 * 60
}

fn default_woot_interval_max() -> u64 {
    120 * 60
}

fn default_woot_message_delay() -> u64 {
    3
}

impl Default for WootConfig {
    fn default() -> Self {
        Self {
            url: default_woot_url(),
            seen_file: default_woot_seen_file(),
            interval_min_secs: default_woot_interval_min(),
            interval_max_secs: default_woot_interval_max(),
            message_delay_secs: default_woot_message_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamelConfig {
    #[serde(default = "default_camel_url")]
    pub url: String,
    /// Top-drops RSS feed, used by `camel_poller --rss`.
    #[serde(default = "default_camel_rss_url")]
    pub rss_url: String,
    #[serde(default = "default_camel_seen_file")]
    pub seen_file: PathBuf,
    /// ASIN-per-line store for the RSS variant.
    #[serde(default = "default_camel_rss_seen_file")]
    pub rss_seen_file: PathBuf,
    /// Last seen price per ASIN, informational only.
    #[serde(default = "default_camel_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_min_drop_pct")]
    pub min_drop_pct: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Pages shorter than this are treated as a failed fetch.
    #[serde(default = "default_camel_min_page_len")]
    pub min_page_len: usize,
    /// RSS variant: look up the current Amazon title and price of each new ASIN.
    #[serde(default)]
    pub rss_enrich: bool,
}

fn default_camel_url() -> String {
    CAMEL_TOP_DROPS_URL.to_string()
}

fn default_camel_rss_url() -> String {
    CAMEL_RSS_URL.to_string()
}

fn default_camel_seen_file() -> PathBuf {
    PathBuf::from("camel_seen.txt")
}

fn default_camel_rss_seen_file() -> PathBuf {
    PathBuf::from("camel_rss_seen.txt")
}

fn default_camel_state_file() -> PathBuf {
    PathBuf::from("camel_price_state.json")
}

fn default_min_drop_pct() -> f64 {
    30.0
}

fn default_camel_min_page_len() -> usize {
    5000
}

impl Default for CamelConfig {
    fn default() -> Self {
        Self {
            url: default_camel_url(),
            rss_url: default_camel_rss_url(),
            seen_file: default_camel_seen_file(),
            rss_seen_file: default_camel_rss_seen_file(),
            state_file: default_camel_state_file(),
            min_drop_pct: default_min_drop_pct(),
            keywords: Vec::new(),
            min_page_len: default_camel_min_page_len(),
            rss_enrich: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmazonConfig {
    #[serde(default = "default_watchlist_file")]
    pub watchlist_file: PathBuf,
    #[serde(default = "default_price_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_sellers_file")]
    pub valid_sellers_file: PathBuf,
    /// Random pause before each item, in seconds.
    #[serde(default = "default_item_pause")]
    pub item_pause_secs: (u64, u64),
    /// Send a summary message at the end of every cycle.
    #[serde(default = "default_true")]
    pub send_summary: bool,
    /// Full watchlist sweep interval; daily unless overridden.
    #[serde(default = "default_amazon_poll_interval")]
    pub poll_interval_secs: u64,
    /// Fraction of the interval added or removed at random.
    #[serde(default = "default_amazon_poll_jitter")]
    pub poll_jitter: f64,
}

fn default_watchlist_file() -> PathBuf {
    PathBuf::from("watchlist.txt")
}

fn default_price_state_file() -> PathBuf {
    PathBuf::from("price_state.json")
}

fn default_sellers_file() -> PathBuf {
    PathBuf::from("valid_sellers.txt")
}

fn default_item_pause() -> (u64, u64) {
    (4, 10)
}

fn default_true() -> bool {
    true
}

fn default_amazon_poll_interval() -> u64 {
    24 * 3600
}

fn default_amazon_poll_jitter() -> f64 {
    0.1
}

impl Default for AmazonConfig {
    fn default() -> Self {
        Self {
            watchlist_file: default_watchlist_file(),
            state_file: default_price_state_file(),
            valid_sellers_file: default_sellers_file(),
            item_pause_secs: default_item_pause(),
            send_summary: true,
            poll_interval_secs: default_amazon_poll_interval(),
            poll_jitter: default_amazon_poll_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_jobs_url")]
    pub url: String,
    #[serde(default = "default_jobs_seen_file")]
    pub seen_file: PathBuf,
    /// Postings stay listed for weeks, so they expire later than deals.
    #[serde(default = "default_jobs_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default = "default_senior_keywords")]
    pub keywords: Vec<String>,
    /// Minimum advertised salary, in thousands.
    #[serde(default)]
    pub min_salary_k: u64,
    #[serde(default)]
    pub blacklist_companies: Vec<String>,
    #[serde(default = "default_max_jobs_per_scan")]
    pub max_jobs_per_scan: usize,
    #[serde(default = "default_max_alerts")]
    pub max_alerts_per_scan: usize,
}

fn default_jobs_url() -> String {
    REMOTEOK_API_URL.to_string()
}

fn default_jobs_seen_file() -> PathBuf {
    PathBuf::from("jobs_seen.txt")
}

fn default_jobs_max_age_hours() -> i64 {
    24 * 30
}

fn default_senior_keywords() -> Vec<String> {
    ["senior", "staff", "lead", "principal", "architect"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_jobs_per_scan() -> usize {
    50
}

fn default_max_alerts() -> usize {
    5
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            url: default_jobs_url(),
            seen_file: default_jobs_seen_file(),
            max_age_hours: default_jobs_max_age_hours(),
            keywords: default_senior_keywords(),
            min_salary_k: 0,
            blacklist_companies: Vec::new(),
            max_jobs_per_scan: default_max_jobs_per_scan(),
            max_alerts_per_scan: default_max_alerts(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config, then apply `.env` / environment overrides for credentials.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!(
                "telegram bot token missing: set [telegram].bot_token or {ENV_BOT_TOKEN}"
            );
        }
        if config.telegram.chat_ids().is_empty() {
            anyhow::bail!("telegram chat id missing: set [telegram].chat_id or {ENV_CHAT_ID}");
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would misbehave at runtime rather than at load.
    pub fn validate(&self) -> Result<()> {
        let hours = [
            ("tracker.max_age_hours", self.tracker.max_age_hours),
            ("tracker.cooldown_hours", self.tracker.cooldown_hours),
            ("jobs.max_age_hours", self.jobs.max_age_hours),
        ];
        for (name, value) in hours {
            if !(0..=MAX_HOURS).contains(&value) {
                anyhow::bail!("{name} must be between 0 and {MAX_HOURS}, got {value}");
            }
        }
        let jitters = [
            ("settings.poll_jitter", self.settings.poll_jitter),
            ("amazon.poll_jitter", self.amazon.poll_jitter),
        ];
        for (name, value) in jitters {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{name} must be between 0 and 1, got {value}");
            }
        }
        if self.woot.interval_min_secs > self.woot.interval_max_secs {
            anyhow::bail!("woot.interval_min_secs must not exceed woot.interval_max_secs");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_BOT_TOKEN).filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = lookup(ENV_CHAT_ID).filter(|v| !v.is_empty()) {
            self.telegram.chat_id = chat;
        }
    }
}
