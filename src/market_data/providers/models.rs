use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::financials::StatementPeriod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Stooq,
    Finnhub,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Stooq => "STOOQ",
            DataSource::Finnhub => "FINNHUB",
        }
    }
}

/// One normalized upstream price row before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

impl PriceRow {
    /// OHLC sanity: `low <= open,close <= high` where the bounds are present,
    /// and non-negative volume.
    fn is_valid(&self) -> bool {
        if self.volume < 0 {
            return false;
        }
        let body_low = match self.open {
            Some(open) => open.min(self.close),
            None => self.close,
        };
        let body_high = match self.open {
            Some(open) => open.max(self.close),
            None => self.close,
        };
        if let Some(low) = self.low {
            if low > body_low {
                return false;
            }
        }
        if let Some(high) = self.high {
            if high < body_high {
                return false;
            }
        }
        true
    }
}

/// A normalized, validated price series: dates strictly ascending, invalid
/// rows dropped and counted.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    pub symbol: String,
    pub source: DataSource,
    pub rows: Vec<PriceRow>,
    pub dropped_rows: usize,
}

impl PriceSeries {
    pub fn validated(symbol: &str, source: DataSource, mut rows: Vec<PriceRow>) -> Self {
        let raw_count = rows.len();
        rows.sort_by_key(|row| row.date);
        // Last write wins on duplicate dates, matching upsert semantics. The
        // sort is stable, so equal dates keep their upstream order.
        let mut deduped: Vec<PriceRow> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.last_mut() {
                Some(last) if last.date == row.date => *last = row,
                _ => deduped.push(row),
            }
        }
        let mut rows = deduped;
        rows.retain(PriceRow::is_valid);

        let dropped_rows = raw_count - rows.len();
        if dropped_rows > 0 {
            warn!(
                "{}: dropped {} invalid or duplicate price rows from {}",
                symbol,
                dropped_rows,
                source.as_str()
            );
        }

        PriceSeries {
            symbol: symbol.to_string(),
            source,
            rows,
            dropped_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Company profile fields used to refresh stock metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
}

/// Everything one fundamentals fetch yields: profile plus the three
/// statements in reporting-period form.
#[derive(Debug, Clone)]
pub struct FundamentalsBundle {
    pub symbol: String,
    pub profile: CompanyProfile,
    pub income_statement: Vec<StatementPeriod>,
    pub balance_sheet: Vec<StatementPeriod>,
    pub cash_flow: Vec<StatementPeriod>,
}

impl FundamentalsBundle {
    pub fn statement_count(&self) -> usize {
        [
            &self.income_statement,
            &self.balance_sheet,
            &self.cash_flow,
        ]
        .iter()
        .filter(|periods| !periods.is_empty())
        .count()
    }
}
