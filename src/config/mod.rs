use chrono::NaiveDate;
use log::warn;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_FINANCIAL_REFRESH_DAYS, DEFAULT_HISTORY_START, DEFAULT_INCREMENTAL_THRESHOLD_DAYS,
    DEFAULT_WORKER_POOL_SIZE,
};

/// Which stored price column feeds valuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    AdjClose,
    Close,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::AdjClose => "adj_close",
            PriceSource::Close => "close",
        }
    }
}

impl FromStr for PriceSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adj_close" => Ok(PriceSource::AdjClose),
            "close" => Ok(PriceSource::Close),
            other => Err(format!("unknown price source '{}'", other)),
        }
    }
}

/// What to do when the valuation date has no stored price row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPriceStrategy {
    /// Use the last price at or before the date and mark the row stale.
    Backfill,
    /// Fail the valuation.
    Strict,
}

impl FromStr for MissingPriceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backfill" => Ok(MissingPriceStrategy::Backfill),
            "strict" => Ok(MissingPriceStrategy::Strict),
            other => Err(format!("unknown missing-price strategy '{}'", other)),
        }
    }
}

/// Engine configuration, resolved once from the environment and read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub finnhub_api_key: Option<String>,
    pub incremental_threshold_days: i64,
    pub financial_refresh_days: i64,
    pub history_start: NaiveDate,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub total_deadline: Duration,
    pub price_source: PriceSource,
    pub missing_price_strategy: MissingPriceStrategy,
    pub worker_pool_size: usize,
    pub recompute_window_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: "./db/lotfolio.db".to_string(),
            finnhub_api_key: None,
            incremental_threshold_days: DEFAULT_INCREMENTAL_THRESHOLD_DAYS,
            financial_refresh_days: DEFAULT_FINANCIAL_REFRESH_DAYS,
            history_start: NaiveDate::parse_from_str(DEFAULT_HISTORY_START, "%Y-%m-%d")
                .expect("default history start is a valid date"),
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            total_deadline: Duration::from_secs(300),
            price_source: PriceSource::AdjClose,
            missing_price_strategy: MissingPriceStrategy::Backfill,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            recompute_window_days: 7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = AppConfig::default();

        AppConfig {
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            finnhub_api_key: std::env::var("FINNHUB_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            incremental_threshold_days: parse_env(
                "STOCK_INCREMENTAL_THRESHOLD_DAYS",
                defaults.incremental_threshold_days,
            ),
            financial_refresh_days: parse_env(
                "FINANCIAL_REFRESH_DAYS",
                defaults.financial_refresh_days,
            ),
            history_start: std::env::var("HISTORY_START_DATE")
                .ok()
                .and_then(|s| match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("Invalid HISTORY_START_DATE '{}': {}. Using default.", s, e);
                        None
                    }
                })
                .unwrap_or(defaults.history_start),
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries),
            base_delay: Duration::from_secs(parse_env(
                "BASE_DELAY_SECONDS",
                defaults.base_delay.as_secs(),
            )),
            request_timeout: Duration::from_secs(parse_env(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout.as_secs(),
            )),
            total_deadline: Duration::from_secs(parse_env(
                "TOTAL_DEADLINE_SECONDS",
                defaults.total_deadline.as_secs(),
            )),
            price_source: parse_env_str("PRICE_SOURCE", defaults.price_source),
            missing_price_strategy: parse_env_str(
                "MISSING_PRICE_STRATEGY",
                defaults.missing_price_strategy,
            ),
            worker_pool_size: parse_env("WORKER_POOL_SIZE", defaults.worker_pool_size).max(1),
            recompute_window_days: parse_env(
                "RECOMPUTE_WINDOW_DAYS",
                defaults.recompute_window_days,
            ),
        }
    }
}

fn parse_env<T: FromStr + Copy>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!("Invalid {} '{}': {}. Using default.", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_str<T: FromStr<Err = String> + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!("Invalid {}: {}. Using default.", key, e);
                default
            }
        },
        Err(_) => default,
    }
}
