use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::PriceSource;

use super::acquisition::FetchStrategy;

/// Domain model for one daily price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

impl PriceBar {
    /// Stable row id so re-downloads of the same day replace in place.
    pub fn row_id(&self) -> String {
        format!("{}_{}", self.date.format("%Y%m%d"), self.symbol)
    }

    pub fn price(&self, source: PriceSource) -> Decimal {
        match source {
            PriceSource::AdjClose => self.adj_close,
            PriceSource::Close => self.close,
        }
    }
}

/// Database model for price bars
#[derive(Queryable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::stock_prices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceBarDb {
    pub id: String,
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: String,
    pub adj_close: String,
    pub volume: i64,
    pub created_at: NaiveDateTime,
}

impl From<&PriceBar> for PriceBarDb {
    fn from(bar: &PriceBar) -> Self {
        PriceBarDb {
            id: bar.row_id(),
            symbol: bar.symbol.clone(),
            date: bar.date,
            open: bar.open.map(|v| v.to_string()),
            high: bar.high.map(|v| v.to_string()),
            low: bar.low.map(|v| v.to_string()),
            close: bar.close.to_string(),
            adj_close: bar.adj_close.to_string(),
            volume: bar.volume,
            created_at: Utc::now().naive_utc(),
        }
    }
}

impl From<PriceBarDb> for PriceBar {
    fn from(row: PriceBarDb) -> Self {
        PriceBar {
            symbol: row.symbol,
            date: row.date,
            open: row.open.as_deref().and_then(|v| Decimal::from_str(v).ok()),
            high: row.high.as_deref().and_then(|v| Decimal::from_str(v).ok()),
            low: row.low.as_deref().and_then(|v| Decimal::from_str(v).ok()),
            close: Decimal::from_str(&row.close).unwrap_or_default(),
            adj_close: Decimal::from_str(&row.adj_close).unwrap_or_default(),
            volume: row.volume,
        }
    }
}

/// Instrument metadata, refreshed from the fundamentals provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMeta {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::stocks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StockDb {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Why a per-symbol sync failed. Mirrors the failure taxonomy the batch
/// aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorCategory {
    Validation,
    ProviderUnavailable,
    ProviderError,
    NoData,
    StorageError,
    Canceled,
}

impl SyncErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCategory::Validation => "validation",
            SyncErrorCategory::ProviderUnavailable => "provider_unavailable",
            SyncErrorCategory::ProviderError => "provider_error",
            SyncErrorCategory::NoData => "no_data",
            SyncErrorCategory::StorageError => "storage_error",
            SyncErrorCategory::Canceled => "canceled",
        }
    }
}

/// Per-symbol result of a price sync. Batch runs aggregate these and never
/// abort on a single symbol's failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSyncOutcome {
    pub symbol: String,
    pub success: bool,
    pub strategy_used: Option<FetchStrategy>,
    pub rows_added: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub error_category: Option<SyncErrorCategory>,
    pub error_message: Option<String>,
}

impl SymbolSyncOutcome {
    pub fn failure(
        symbol: &str,
        strategy: Option<FetchStrategy>,
        category: SyncErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        SymbolSyncOutcome {
            symbol: symbol.to_string(),
            success: false,
            strategy_used: strategy,
            rows_added: 0,
            first_date: None,
            last_date: None,
            error_category: Some(category),
            error_message: Some(message.into()),
        }
    }
}

/// Per-symbol result of a fundamentals sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSyncOutcome {
    pub symbol: String,
    pub success: bool,
    pub refreshed: bool,
    pub facts_written: usize,
    pub error_message: Option<String>,
}

/// Combined per-symbol entry emitted by batch acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncEntry {
    pub symbol: String,
    pub success: bool,
    pub prices: SymbolSyncOutcome,
    pub financials: Option<FinancialSyncOutcome>,
}

/// Aggregate summary of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<BatchSyncEntry>,
}
