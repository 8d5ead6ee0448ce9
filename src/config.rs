use std::env;

/// Runtime configuration, loaded from environment variables with the
/// production defaults. Every upstream base URL is overridable so tests can
/// point providers at local doubles.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite cache database.
    pub database_path: String,

    /// User-Agent sent to the SEC; they require an identifying contact.
    pub sec_user_agent: String,

    /// Cache TTLs in days, per market.
    pub cache_ttl_days_us: i64,
    pub cache_ttl_days_in: i64,

    /// Minimum inter-call delay per provider, in seconds.
    pub sec_min_delay_secs: f64,
    pub yahoo_min_delay_secs: f64,

    /// Global Yahoo cooldown applied after a rate-limit response.
    pub yahoo_cooldown_secs: u64,
    /// Per-symbol soft-fail window applied after any Yahoo failure.
    pub yahoo_fail_softcache_minutes: u64,
    /// When set, a forced refresh may use the heavy Yahoo endpoint.
    pub yahoo_heavy_on_refresh_only: bool,

    /// Bulk ticker directory host (company_tickers.json).
    pub sec_files_base_url: String,
    /// XBRL companyfacts host.
    pub sec_data_base_url: String,
    pub yahoo_base_url: String,
    pub screener_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: "data/fundamentals.db".to_string(),
            sec_user_agent: "Fundsap/1.0 (contact@fundsap.local)".to_string(),
            cache_ttl_days_us: 30,
            cache_ttl_days_in: 30,
            sec_min_delay_secs: 0.12,
            yahoo_min_delay_secs: 1.2,
            yahoo_cooldown_secs: 90,
            yahoo_fail_softcache_minutes: 30,
            yahoo_heavy_on_refresh_only: true,
            sec_files_base_url: "https://www.sec.gov".to_string(),
            sec_data_base_url: "https://data.sec.gov".to_string(),
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            screener_base_url: "https://www.screener.in".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();
        Config {
            database_path: env_or("FUND_DB_PATH", defaults.database_path),
            sec_user_agent: env_or("SEC_USER_AGENT", defaults.sec_user_agent),
            cache_ttl_days_us: env_parse("FUND_CACHE_TTL_DAYS_US", defaults.cache_ttl_days_us),
            cache_ttl_days_in: env_parse("FUND_CACHE_TTL_DAYS_IN", defaults.cache_ttl_days_in),
            sec_min_delay_secs: env_parse("SEC_MIN_DELAY", defaults.sec_min_delay_secs),
            yahoo_min_delay_secs: env_parse("YAHOO_MIN_DELAY", defaults.yahoo_min_delay_secs),
            yahoo_cooldown_secs: env_parse("YAHOO_COOLDOWN_SECONDS", defaults.yahoo_cooldown_secs),
            yahoo_fail_softcache_minutes: env_parse(
                "YAHOO_FAIL_SOFTCACHE_MINUTES",
                defaults.yahoo_fail_softcache_minutes,
            ),
            yahoo_heavy_on_refresh_only: env::var("YAHOO_ALLOW_INFO_ON_REFRESH_ONLY")
                .map(|v| v != "0")
                .unwrap_or(defaults.yahoo_heavy_on_refresh_only),
            sec_files_base_url: env_or("SEC_FILES_BASE_URL", defaults.sec_files_base_url),
            sec_data_base_url: env_or("SEC_DATA_BASE_URL", defaults.sec_data_base_url),
            yahoo_base_url: env_or("YAHOO_BASE_URL", defaults.yahoo_base_url),
            screener_base_url: env_or("SCREENER_BASE_URL", defaults.screener_base_url),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
