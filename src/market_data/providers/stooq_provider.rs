use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::backoff::{retry_with_backoff, RetryPolicy};
use super::models::{DataSource, PriceRow, PriceSeries};
use super::price_provider::PriceProvider;
use crate::config::AppConfig;
use crate::market_data::MarketDataError;

const BASE_URL: &str = "https://stooq.com/q/d/l/";
const PROVIDER: &str = "STOOQ";

/// Bulk historical source: one CSV download covers the full requested range.
/// Stooq daily series are already split/dividend adjusted, so close doubles
/// as adjusted close.
pub struct StooqProvider {
    client: Client,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct StooqCsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: Option<Decimal>,
    #[serde(rename = "High")]
    high: Option<Decimal>,
    #[serde(rename = "Low")]
    low: Option<Decimal>,
    #[serde(rename = "Close")]
    close: Decimal,
    #[serde(rename = "Volume")]
    volume: Option<i64>,
}

impl StooqProvider {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        StooqProvider {
            client,
            policy: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.base_delay,
                total_deadline: config.total_deadline,
            },
        }
    }

    /// Stooq wants lowercase symbols with a market suffix; plain US tickers
    /// get `.us` appended.
    fn stooq_symbol(symbol: &str) -> String {
        let lower = symbol.to_ascii_lowercase();
        if lower.contains('.') {
            lower
        } else {
            format!("{}.us", lower)
        }
    }

    async fn fetch_series(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries, MarketDataError> {
        let stooq_symbol = Self::stooq_symbol(symbol);
        debug!(
            "Downloading {} history from Stooq ({} to {})",
            symbol, from, to
        );

        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("s", stooq_symbol.as_str()),
                ("d1", &from.format("%Y%m%d").to_string()),
                ("d2", &to.format("%Y%m%d").to_string()),
                ("i", "d"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MarketDataError::UpstreamStatus {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let rows = Self::parse_csv(&body)?;
        if rows.is_empty() {
            return Err(MarketDataError::NoData);
        }

        Ok(PriceSeries::validated(symbol, DataSource::Stooq, rows))
    }

    fn parse_csv(body: &str) -> Result<Vec<PriceRow>, MarketDataError> {
        if body.trim().is_empty() || body.starts_with("No data") {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut rows = Vec::new();
        for record in reader.deserialize::<StooqCsvRow>() {
            let record = record.map_err(|e| MarketDataError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("malformed CSV row: {}", e),
            })?;
            let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d").map_err(|e| {
                MarketDataError::ProviderError {
                    provider: PROVIDER.to_string(),
                    message: format!("malformed date '{}': {}", record.date, e),
                }
            })?;
            rows.push(PriceRow {
                date,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                adj_close: record.close,
                volume: record.volume.unwrap_or(0),
            });
        }
        Ok(rows)
    }
}

#[async_trait]
impl PriceProvider for StooqProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn download_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<PriceSeries, MarketDataError> {
        retry_with_backoff(self.policy, PROVIDER, cancel, || {
            self.fetch_series(symbol, from, to)
        })
        .await
    }
}
