use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use super::models::{FundamentalsBundle, PriceSeries};
use crate::market_data::MarketDataError;

/// A source of daily price history. Implementations normalize upstream
/// payloads, handle their own retries, and never touch storage.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn download_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<PriceSeries, MarketDataError>;
}

/// A source of company fundamentals: profile plus the three statements.
#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn download_fundamentals(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<FundamentalsBundle, MarketDataError>;
}
