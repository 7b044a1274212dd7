use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::market_data_errors::MarketDataError;
use super::market_data_model::{PriceBar, PriceBarDb, StockDb, StockMeta};
use super::market_data_traits::MarketDataRepositoryTrait;
use crate::db::get_connection;
use crate::errors::Result;
use crate::schema::{stock_prices, stocks};

pub struct MarketDataRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl MarketDataRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }
}

impl MarketDataRepositoryTrait for MarketDataRepository {
    fn ensure_stock(&self, symbol: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;

        let row = StockDb {
            symbol: symbol.to_string(),
            company_name: None,
            sector: None,
            industry: None,
            description: None,
            created_at: Utc::now().naive_utc(),
        };
        diesel::insert_or_ignore_into(stocks::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(MarketDataError::DatabaseError)?;
        Ok(())
    }

    fn update_stock_meta(&self, symbol: &str, meta: &StockMeta) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;

        diesel::update(stocks::table.filter(stocks::symbol.eq(symbol)))
            .set((
                stocks::company_name.eq(&meta.company_name),
                stocks::sector.eq(&meta.sector),
                stocks::industry.eq(&meta.industry),
                stocks::description.eq(&meta.description),
            ))
            .execute(&mut conn)
            .map_err(MarketDataError::DatabaseError)?;
        Ok(())
    }

    fn save_price_bars(&self, bars: &[PriceBar]) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        conn.transaction(|conn| {
            // Process in batches to keep statement size bounded
            for chunk in bars.chunks(1000) {
                let rows: Vec<PriceBarDb> = chunk.iter().map(PriceBarDb::from).collect();

                diesel::replace_into(stock_prices::table)
                    .values(&rows)
                    .execute(conn)
                    .map_err(MarketDataError::DatabaseError)?;
            }
            Ok(())
        })
    }

    fn get_price_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<PriceBar>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = stock_prices::table
            .filter(stock_prices::symbol.eq(symbol))
            .order(stock_prices::date.asc())
            .into_boxed();
        if let Some(start) = start {
            query = query.filter(stock_prices::date.ge(start));
        }
        if let Some(end) = end {
            query = query.filter(stock_prices::date.le(end));
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        Ok(query
            .load::<PriceBarDb>(&mut conn)
            .map_err(MarketDataError::DatabaseError)?
            .into_iter()
            .map(PriceBar::from)
            .collect())
    }

    fn get_latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let mut conn = get_connection(&self.pool)?;

        let latest = stock_prices::table
            .filter(stock_prices::symbol.eq(symbol))
            .select(diesel::dsl::max(stock_prices::date))
            .first::<Option<NaiveDate>>(&mut conn)
            .map_err(MarketDataError::DatabaseError)?;
        Ok(latest)
    }

    fn get_price_at(&self, symbol: &str, date: NaiveDate) -> Result<Option<PriceBar>> {
        let mut conn = get_connection(&self.pool)?;

        let row = stock_prices::table
            .filter(stock_prices::symbol.eq(symbol))
            .filter(stock_prices::date.eq(date))
            .first::<PriceBarDb>(&mut conn)
            .optional()
            .map_err(MarketDataError::DatabaseError)?;
        Ok(row.map(PriceBar::from))
    }

    fn get_price_at_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<PriceBar>> {
        let mut conn = get_connection(&self.pool)?;

        let row = stock_prices::table
            .filter(stock_prices::symbol.eq(symbol))
            .filter(stock_prices::date.le(date))
            .order(stock_prices::date.desc())
            .first::<PriceBarDb>(&mut conn)
            .optional()
            .map_err(MarketDataError::DatabaseError)?;
        Ok(row.map(PriceBar::from))
    }

    fn get_trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
        let mut conn = get_connection(&self.pool)?;

        let days = stock_prices::table
            .filter(stock_prices::date.ge(start))
            .filter(stock_prices::date.le(end))
            .select(stock_prices::date)
            .distinct()
            .order(stock_prices::date.asc())
            .load::<NaiveDate>(&mut conn)
            .map_err(MarketDataError::DatabaseError)?;
        Ok(days)
    }

    fn list_symbols(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;

        let symbols = stocks::table
            .select(stocks::symbol)
            .order(stocks::symbol.asc())
            .load::<String>(&mut conn)
            .map_err(MarketDataError::DatabaseError)?;
        Ok(symbols)
    }
}
