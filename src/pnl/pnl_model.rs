use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One owner/symbol/date mark-to-market row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPnl {
    pub owner_id: String,
    pub symbol: String,
    pub valuation_date: NaiveDate,
    pub quantity: Decimal,
    pub weighted_avg_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub realized_pnl_day: Decimal,
    pub realized_pnl_pct: Decimal,
    pub total_cost: Decimal,
    /// The date the market price actually came from; differs from
    /// `valuation_date` when back-filled.
    pub price_date: Option<NaiveDate>,
    pub is_stale_price: bool,
    pub calculated_at: DateTime<Utc>,
}

impl DailyPnl {
    /// Stable row id so recomputes replace in place.
    pub fn row_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.valuation_date.format("%Y%m%d"),
            self.owner_id,
            self.symbol
        )
    }
}

#[derive(Queryable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::daily_pnl)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyPnlDb {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub valuation_date: NaiveDate,
    pub quantity: String,
    pub weighted_avg_cost: String,
    pub market_price: String,
    pub market_value: String,
    pub unrealized_pnl: String,
    pub unrealized_pnl_pct: String,
    pub realized_pnl_day: String,
    pub realized_pnl_pct: String,
    pub total_cost: String,
    pub price_date: Option<NaiveDate>,
    pub is_stale_price: bool,
    pub calculated_at: NaiveDateTime,
}

impl From<&DailyPnl> for DailyPnlDb {
    fn from(row: &DailyPnl) -> Self {
        DailyPnlDb {
            id: row.row_id(),
            owner_id: row.owner_id.clone(),
            symbol: row.symbol.clone(),
            valuation_date: row.valuation_date,
            quantity: row.quantity.to_string(),
            weighted_avg_cost: row.weighted_avg_cost.to_string(),
            market_price: row.market_price.to_string(),
            market_value: row.market_value.to_string(),
            unrealized_pnl: row.unrealized_pnl.to_string(),
            unrealized_pnl_pct: row.unrealized_pnl_pct.to_string(),
            realized_pnl_day: row.realized_pnl_day.to_string(),
            realized_pnl_pct: row.realized_pnl_pct.to_string(),
            total_cost: row.total_cost.to_string(),
            price_date: row.price_date,
            is_stale_price: row.is_stale_price,
            calculated_at: row.calculated_at.naive_utc(),
        }
    }
}

impl From<DailyPnlDb> for DailyPnl {
    fn from(row: DailyPnlDb) -> Self {
        DailyPnl {
            owner_id: row.owner_id,
            symbol: row.symbol,
            valuation_date: row.valuation_date,
            quantity: Decimal::from_str(&row.quantity).unwrap_or_default(),
            weighted_avg_cost: Decimal::from_str(&row.weighted_avg_cost).unwrap_or_default(),
            market_price: Decimal::from_str(&row.market_price).unwrap_or_default(),
            market_value: Decimal::from_str(&row.market_value).unwrap_or_default(),
            unrealized_pnl: Decimal::from_str(&row.unrealized_pnl).unwrap_or_default(),
            unrealized_pnl_pct: Decimal::from_str(&row.unrealized_pnl_pct).unwrap_or_default(),
            realized_pnl_day: Decimal::from_str(&row.realized_pnl_day).unwrap_or_default(),
            realized_pnl_pct: Decimal::from_str(&row.realized_pnl_pct).unwrap_or_default(),
            total_cost: Decimal::from_str(&row.total_cost).unwrap_or_default(),
            price_date: row.price_date,
            is_stale_price: row.is_stale_price,
            calculated_at: Utc.from_utc_datetime(&row.calculated_at),
        }
    }
}

/// Outcome of a ranged batch valuation. Partial success is expected; callers
/// inspect `failed` to decide the exit code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPnlSummary {
    pub computed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(NaiveDate, String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn db_round_trip_preserves_values() {
        let row = DailyPnl {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            valuation_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            quantity: dec!(30),
            weighted_avg_cost: dec!(160),
            market_price: dec!(175),
            market_value: dec!(5250),
            unrealized_pnl: dec!(450),
            unrealized_pnl_pct: dec!(0.09375),
            realized_pnl_day: dec!(0),
            realized_pnl_pct: dec!(0),
            total_cost: dec!(4800),
            price_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            is_stale_price: false,
            calculated_at: Utc::now(),
        };
        let db = DailyPnlDb::from(&row);
        assert_eq!(db.id, "20240315_u1_AAPL");
        let back = DailyPnl::from(db);
        assert_eq!(back.quantity, row.quantity);
        assert_eq!(back.market_value, row.market_value);
        assert_eq!(back.unrealized_pnl_pct, row.unrealized_pnl_pct);
        assert_eq!(back.price_date, row.price_date);
    }
}
