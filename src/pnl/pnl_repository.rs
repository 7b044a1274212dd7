use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::pnl_errors::Result;
use super::pnl_model::{DailyPnl, DailyPnlDb};
use crate::db::get_connection;
use crate::schema::daily_pnl;

pub struct PnlRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl PnlRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Upsert by natural key; recomputes replace the stored row.
    pub fn upsert_daily_pnl(&self, row: &DailyPnl) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;

        diesel::replace_into(daily_pnl::table)
            .values(DailyPnlDb::from(row))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_daily_pnl(
        &self,
        owner_id: &str,
        symbol: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyPnl>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = daily_pnl::table
            .filter(daily_pnl::owner_id.eq(owner_id))
            .order((daily_pnl::symbol.asc(), daily_pnl::valuation_date.asc()))
            .into_boxed();
        if let Some(symbol) = symbol {
            query = query.filter(daily_pnl::symbol.eq(symbol.to_string()));
        }
        if let Some(start) = start {
            query = query.filter(daily_pnl::valuation_date.ge(start));
        }
        if let Some(end) = end {
            query = query.filter(daily_pnl::valuation_date.le(end));
        }

        let rows = query.load::<DailyPnlDb>(&mut conn)?;
        Ok(rows.into_iter().map(DailyPnl::from).collect())
    }

    pub fn get_daily_pnl_row(
        &self,
        owner_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyPnl>> {
        let mut conn = get_connection(&self.pool)?;

        let row = daily_pnl::table
            .filter(daily_pnl::owner_id.eq(owner_id))
            .filter(daily_pnl::symbol.eq(symbol))
            .filter(daily_pnl::valuation_date.eq(date))
            .first::<DailyPnlDb>(&mut conn)
            .optional()?;
        Ok(row.map(DailyPnl::from))
    }
}
