use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use super::ledger_errors::{LedgerError, Result};
use super::ledger_model::{
    PositionLot, PositionLotDb, SaleAllocation, SaleAllocationDb, Transaction, TransactionDb,
};
use crate::db::get_connection;
use crate::pnl::pnl_model::{DailyPnl, DailyPnlDb};
use crate::schema::{daily_pnl, position_lots, sale_allocations, stocks, transactions};

/// Storage access for the lot ledger. Mutating methods take a connection so
/// one buy or sell is exactly one database transaction; `with_transaction`
/// supplies that scope.
pub struct LedgerRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl LedgerRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Runs `f` inside an immediate transaction; any error rolls the whole
    /// scope back. Immediate mode takes the write lock up front, which keeps
    /// concurrent sells on one database serialized.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut conn = get_connection(&self.pool)?;
        conn.immediate_transaction(f)
    }

    pub fn ensure_stock(conn: &mut SqliteConnection, symbol: &str) -> Result<()> {
        diesel::insert_or_ignore_into(stocks::table)
            .values((
                stocks::symbol.eq(symbol),
                stocks::created_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn insert_transaction(conn: &mut SqliteConnection, txn: &Transaction) -> Result<()> {
        diesel::insert_into(transactions::table)
            .values(TransactionDb::from(txn))
            .execute(conn)?;
        Ok(())
    }

    pub fn find_transaction_by_external_id(
        conn: &mut SqliteConnection,
        owner_id: &str,
        external_id: &str,
    ) -> Result<Option<Transaction>> {
        let row = transactions::table
            .filter(transactions::owner_id.eq(owner_id))
            .filter(transactions::external_id.eq(external_id))
            .first::<TransactionDb>(conn)
            .optional()?;
        Ok(row.map(Transaction::from))
    }

    pub fn insert_lot(conn: &mut SqliteConnection, lot: &PositionLot) -> Result<()> {
        diesel::insert_into(position_lots::table)
            .values(PositionLotDb::from(lot))
            .execute(conn)?;
        Ok(())
    }

    pub fn update_lot_remaining(
        conn: &mut SqliteConnection,
        lot_id: &str,
        new_remaining: Decimal,
        is_closed: bool,
    ) -> Result<()> {
        let updated = diesel::update(position_lots::table.filter(position_lots::id.eq(lot_id)))
            .set((
                position_lots::remaining_quantity.eq(new_remaining.to_string()),
                position_lots::is_closed.eq(is_closed),
                position_lots::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!("lot {}", lot_id)));
        }
        Ok(())
    }

    pub fn insert_allocation(
        conn: &mut SqliteConnection,
        allocation: &SaleAllocation,
    ) -> Result<()> {
        diesel::insert_into(sale_allocations::table)
            .values(SaleAllocationDb::from(allocation))
            .execute(conn)?;
        Ok(())
    }

    /// Open lots for one owner and symbol, oldest first with id as the tie
    /// break, which is also the order matchers rely on.
    pub fn open_lots_conn(
        conn: &mut SqliteConnection,
        owner_id: &str,
        symbol: &str,
    ) -> Result<Vec<PositionLot>> {
        let rows = position_lots::table
            .filter(position_lots::owner_id.eq(owner_id))
            .filter(position_lots::symbol.eq(symbol))
            .filter(position_lots::is_closed.eq(false))
            .order((position_lots::purchase_date.asc(), position_lots::id.asc()))
            .load::<PositionLotDb>(conn)?;
        Ok(rows.into_iter().map(PositionLot::from).collect())
    }

    pub fn lot_for_buy_transaction(
        conn: &mut SqliteConnection,
        buy_transaction_id: &str,
    ) -> Result<Option<PositionLot>> {
        let row = position_lots::table
            .filter(position_lots::buy_transaction_id.eq(buy_transaction_id))
            .first::<PositionLotDb>(conn)
            .optional()?;
        Ok(row.map(PositionLot::from))
    }

    pub fn allocations_for_sell_conn(
        conn: &mut SqliteConnection,
        sell_transaction_id: &str,
    ) -> Result<Vec<SaleAllocation>> {
        let rows = sale_allocations::table
            .filter(sale_allocations::sell_transaction_id.eq(sell_transaction_id))
            .order(sale_allocations::created_at.asc())
            .load::<SaleAllocationDb>(conn)?;
        Ok(rows.into_iter().map(SaleAllocation::from).collect())
    }

    /// Folds a sell's realized PnL into the day's `daily_pnl` row inside the
    /// sell transaction. When the valuation hasn't run for that day yet, a
    /// placeholder row carrying only the cost side is written and marked
    /// stale; the PnL calculator completes it later.
    pub fn fold_realized_pnl_into_daily(
        conn: &mut SqliteConnection,
        owner_id: &str,
        symbol: &str,
        date: NaiveDate,
        realized_delta: Decimal,
        open_lots_after: &[PositionLot],
    ) -> Result<()> {
        let existing = daily_pnl::table
            .filter(daily_pnl::owner_id.eq(owner_id))
            .filter(daily_pnl::symbol.eq(symbol))
            .filter(daily_pnl::valuation_date.eq(date))
            .first::<DailyPnlDb>(conn)
            .optional()?;

        match existing {
            Some(row) => {
                let current = Decimal::from_str(&row.realized_pnl_day).unwrap_or_default();
                let total_cost = Decimal::from_str(&row.total_cost).unwrap_or_default();
                let new_realized = current + realized_delta;
                let new_pct = if total_cost > Decimal::ZERO {
                    new_realized / total_cost
                } else {
                    Decimal::ZERO
                };
                diesel::update(daily_pnl::table.filter(daily_pnl::id.eq(&row.id)))
                    .set((
                        daily_pnl::realized_pnl_day.eq(new_realized.to_string()),
                        daily_pnl::realized_pnl_pct.eq(new_pct.to_string()),
                        daily_pnl::calculated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
            }
            None => {
                let quantity: Decimal = open_lots_after
                    .iter()
                    .map(|lot| lot.remaining_quantity)
                    .sum();
                let total_cost: Decimal = open_lots_after
                    .iter()
                    .map(|lot| lot.remaining_cost())
                    .sum();
                let avg_cost = if quantity > Decimal::ZERO {
                    total_cost / quantity
                } else {
                    Decimal::ZERO
                };
                let realized_pct = if total_cost > Decimal::ZERO {
                    realized_delta / total_cost
                } else {
                    Decimal::ZERO
                };

                let placeholder = DailyPnl {
                    owner_id: owner_id.to_string(),
                    symbol: symbol.to_string(),
                    valuation_date: date,
                    quantity,
                    weighted_avg_cost: avg_cost,
                    market_price: Decimal::ZERO,
                    market_value: Decimal::ZERO,
                    unrealized_pnl: Decimal::ZERO,
                    unrealized_pnl_pct: Decimal::ZERO,
                    realized_pnl_day: realized_delta,
                    realized_pnl_pct: realized_pct,
                    total_cost,
                    price_date: None,
                    is_stale_price: true,
                    calculated_at: Utc::now(),
                };
                diesel::replace_into(daily_pnl::table)
                    .values(DailyPnlDb::from(&placeholder))
                    .execute(conn)?;
            }
        }
        Ok(())
    }

    pub fn get_open_lots(&self, owner_id: &str, symbol: &str) -> Result<Vec<PositionLot>> {
        let mut conn = get_connection(&self.pool)?;
        Self::open_lots_conn(&mut conn, owner_id, symbol)
    }

    /// All lots, open and closed, optionally narrowed to one symbol.
    pub fn get_lots(&self, owner_id: &str, symbol: Option<&str>) -> Result<Vec<PositionLot>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = position_lots::table
            .filter(position_lots::owner_id.eq(owner_id))
            .order((
                position_lots::symbol.asc(),
                position_lots::purchase_date.asc(),
                position_lots::id.asc(),
            ))
            .into_boxed();
        if let Some(symbol) = symbol {
            query = query.filter(position_lots::symbol.eq(symbol.to_string()));
        }

        let rows = query.load::<PositionLotDb>(&mut conn)?;
        Ok(rows.into_iter().map(PositionLot::from).collect())
    }

    /// Allocations for one owner and symbol paired with the date of the sell
    /// that produced them, oldest sell first.
    pub fn get_allocations_with_sell_dates(
        &self,
        owner_id: &str,
        symbol: &str,
    ) -> Result<Vec<(SaleAllocation, NaiveDate)>> {
        let mut conn = get_connection(&self.pool)?;

        let rows = sale_allocations::table
            .inner_join(transactions::table)
            .filter(transactions::owner_id.eq(owner_id))
            .filter(transactions::symbol.eq(symbol))
            .order((
                transactions::transaction_date.asc(),
                sale_allocations::created_at.asc(),
            ))
            .select((
                sale_allocations::all_columns,
                transactions::transaction_date,
            ))
            .load::<(SaleAllocationDb, NaiveDate)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(row, date)| (SaleAllocation::from(row), date))
            .collect())
    }

    pub fn get_transactions(
        &self,
        owner_id: &str,
        symbol: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = transactions::table
            .filter(transactions::owner_id.eq(owner_id))
            .order((
                transactions::transaction_date.asc(),
                transactions::created_at.asc(),
            ))
            .into_boxed();
        if let Some(symbol) = symbol {
            query = query.filter(transactions::symbol.eq(symbol.to_string()));
        }
        if let Some(start) = start {
            query = query.filter(transactions::transaction_date.ge(start));
        }
        if let Some(end) = end {
            query = query.filter(transactions::transaction_date.le(end));
        }

        let rows = query.load::<TransactionDb>(&mut conn)?;
        Ok(rows.into_iter().map(Transaction::from).collect())
    }

    /// Symbols with at least one lot for the owner.
    pub fn get_active_symbols(&self, owner_id: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;

        let symbols = position_lots::table
            .filter(position_lots::owner_id.eq(owner_id))
            .select(position_lots::symbol)
            .distinct()
            .order(position_lots::symbol.asc())
            .load::<String>(&mut conn)?;
        Ok(symbols)
    }
}
