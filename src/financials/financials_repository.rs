use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::financials_model::{
    BalanceSheetRowDb, CashFlowRowDb, FinancialFact, IncomeStatementRowDb, StatementPeriod,
    StatementType,
};
use crate::db::get_connection;
use crate::errors::Result;
use crate::schema::{balance_sheet, cash_flow, income_statement};

/// Repository for the three normalized statement tables.
pub struct FinancialsRepository {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl FinancialsRepository {
    pub fn new(pool: Arc<Pool<ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Upserts every line item of one statement's reporting periods inside a
    /// single transaction. Conflicts on (symbol, period_end, line_item)
    /// replace the stored value.
    pub fn upsert_statement(
        &self,
        symbol: &str,
        statement: StatementType,
        periods: &[StatementPeriod],
    ) -> Result<usize> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().naive_utc();
        let mut written = 0;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for period in periods {
                for (line_item, value) in &period.items {
                    match statement {
                        StatementType::IncomeStatement => {
                            let row = IncomeStatementRowDb::new(
                                symbol,
                                period.period_end,
                                line_item,
                                *value,
                                now,
                            );
                            diesel::replace_into(income_statement::table)
                                .values(&row)
                                .execute(conn)?;
                        }
                        StatementType::BalanceSheet => {
                            let row = BalanceSheetRowDb::new(
                                symbol,
                                period.period_end,
                                line_item,
                                *value,
                                now,
                            );
                            diesel::replace_into(balance_sheet::table)
                                .values(&row)
                                .execute(conn)?;
                        }
                        StatementType::CashFlow => {
                            let row = CashFlowRowDb::new(
                                symbol,
                                period.period_end,
                                line_item,
                                *value,
                                now,
                            );
                            diesel::replace_into(cash_flow::table)
                                .values(&row)
                                .execute(conn)?;
                        }
                    }
                    written += 1;
                }
            }
            Ok(())
        })?;

        Ok(written)
    }

    /// Latest reporting period stored for the symbol across all three
    /// statements. Drives the fundamentals refresh policy.
    pub fn get_latest_period_end(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let mut conn = get_connection(&self.pool)?;

        let income: Option<NaiveDate> = income_statement::table
            .filter(income_statement::symbol.eq(symbol))
            .select(diesel::dsl::max(income_statement::period_end))
            .first(&mut conn)?;
        let balance: Option<NaiveDate> = balance_sheet::table
            .filter(balance_sheet::symbol.eq(symbol))
            .select(diesel::dsl::max(balance_sheet::period_end))
            .first(&mut conn)?;
        let cash: Option<NaiveDate> = cash_flow::table
            .filter(cash_flow::symbol.eq(symbol))
            .select(diesel::dsl::max(cash_flow::period_end))
            .first(&mut conn)?;

        Ok([income, balance, cash].into_iter().flatten().max())
    }

    /// All stored facts of one statement for a symbol, newest period first.
    pub fn get_statement(
        &self,
        symbol: &str,
        statement: StatementType,
    ) -> Result<Vec<FinancialFact>> {
        let mut conn = get_connection(&self.pool)?;

        let rows: Vec<(String, NaiveDate, String, Option<String>)> = match statement {
            StatementType::IncomeStatement => income_statement::table
                .filter(income_statement::symbol.eq(symbol))
                .order(income_statement::period_end.desc())
                .select((
                    income_statement::symbol,
                    income_statement::period_end,
                    income_statement::line_item,
                    income_statement::value,
                ))
                .load(&mut conn)?,
            StatementType::BalanceSheet => balance_sheet::table
                .filter(balance_sheet::symbol.eq(symbol))
                .order(balance_sheet::period_end.desc())
                .select((
                    balance_sheet::symbol,
                    balance_sheet::period_end,
                    balance_sheet::line_item,
                    balance_sheet::value,
                ))
                .load(&mut conn)?,
            StatementType::CashFlow => cash_flow::table
                .filter(cash_flow::symbol.eq(symbol))
                .order(cash_flow::period_end.desc())
                .select((
                    cash_flow::symbol,
                    cash_flow::period_end,
                    cash_flow::line_item,
                    cash_flow::value,
                ))
                .load(&mut conn)?,
        };

        Ok(rows
            .into_iter()
            .map(|(symbol, period_end, line_item, value)| {
                FinancialFact::from_row(statement, symbol, period_end, line_item, value)
            })
            .collect())
    }
}
