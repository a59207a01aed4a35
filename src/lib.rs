pub mod config;
pub mod driver;
pub mod fetch;
pub mod id_store;
pub mod notify;
pub mod price;
pub mod reporter;
pub mod seen;
pub mod sources;
pub mod telemetry;
pub mod types;

/// Telegram Bot API base URL. The bot token is appended as `/bot<token>`.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Timestamp format written into seen-record stores (local time, sortable).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Slickdeals RSS feeds: frontpage + popular.
pub const SLICKDEALS_FEEDS: [&str; 2] = [
    "https://slickdeals.net/newsearch.php?mode=frontpage&searcharea=deals&rss=1",
    "https://slickdeals.net/newsearch.php?mode=popular&searcharea=deals&rss=1",
];

/// Woot sellout category page.
pub const WOOT_SELLOUT_URL: &str = "https://www.woot.com/category/sellout";

/// CamelCamelCamel top drops page.
pub const CAMEL_TOP_DROPS_URL: &str = "https://camelcamelcamel.com/top_drops";

/// RSS flavour of the top-drops list.
pub const CAMEL_RSS_URL: &str = "https://camelcamelcamel.com/top_drops/feed";

/// RemoteOK jobs API (python tag).
pub const REMOTEOK_API_URL: &str = "https://remoteok.com/api?tags=python";
