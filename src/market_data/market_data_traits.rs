use chrono::NaiveDate;

use super::market_data_model::{PriceBar, StockMeta};
use crate::errors::Result;

pub trait MarketDataRepositoryTrait: Send + Sync {
    fn ensure_stock(&self, symbol: &str) -> Result<()>;
    fn update_stock_meta(&self, symbol: &str, meta: &StockMeta) -> Result<()>;
    fn save_price_bars(&self, bars: &[PriceBar]) -> Result<()>;
    fn get_price_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<PriceBar>>;
    fn get_latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>>;
    fn get_price_at(&self, symbol: &str, date: NaiveDate) -> Result<Option<PriceBar>>;
    fn get_price_at_or_before(&self, symbol: &str, date: NaiveDate)
        -> Result<Option<PriceBar>>;
    fn get_trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>>;
    fn list_symbols(&self) -> Result<Vec<String>>;
}
