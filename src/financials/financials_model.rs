use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which of the three statement tables a fact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::IncomeStatement => "income_statement",
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
        }
    }

    pub fn all() -> [StatementType; 3] {
        [
            StatementType::IncomeStatement,
            StatementType::BalanceSheet,
            StatementType::CashFlow,
        ]
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income_statement" => Ok(StatementType::IncomeStatement),
            "balance_sheet" => Ok(StatementType::BalanceSheet),
            "cash_flow" => Ok(StatementType::CashFlow),
            other => Err(format!("unknown statement type '{}'", other)),
        }
    }
}

/// One reporting period of one statement in normalized long form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementPeriod {
    pub period_end: NaiveDate,
    pub items: Vec<(String, Option<Decimal>)>,
}

/// A single stored line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialFact {
    pub symbol: String,
    pub statement: StatementType,
    pub period_end: NaiveDate,
    pub line_item: String,
    pub value: Option<Decimal>,
}

impl FinancialFact {
    pub(crate) fn from_row(
        statement: StatementType,
        symbol: String,
        period_end: NaiveDate,
        line_item: String,
        value: Option<String>,
    ) -> Self {
        FinancialFact {
            symbol,
            statement,
            period_end,
            line_item,
            value: value.as_deref().and_then(|v| Decimal::from_str(v).ok()),
        }
    }
}

// The three statement tables share a shape but diesel binds an Insertable to
// a single table, so each gets its own row struct.

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::income_statement)]
pub struct IncomeStatementRowDb {
    pub id: String,
    pub symbol: String,
    pub period_end: NaiveDate,
    pub line_item: String,
    pub value: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::balance_sheet)]
pub struct BalanceSheetRowDb {
    pub id: String,
    pub symbol: String,
    pub period_end: NaiveDate,
    pub line_item: String,
    pub value: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::cash_flow)]
pub struct CashFlowRowDb {
    pub id: String,
    pub symbol: String,
    pub period_end: NaiveDate,
    pub line_item: String,
    pub value: Option<String>,
    pub created_at: NaiveDateTime,
}

macro_rules! impl_fact_row {
    ($row:ident) => {
        impl $row {
            pub fn new(
                symbol: &str,
                period_end: NaiveDate,
                line_item: &str,
                value: Option<Decimal>,
                now: NaiveDateTime,
            ) -> Self {
                $row {
                    id: uuid::Uuid::new_v4().to_string(),
                    symbol: symbol.to_string(),
                    period_end,
                    line_item: line_item.to_string(),
                    value: value.map(|v| v.to_string()),
                    created_at: now,
                }
            }
        }
    };
}

impl_fact_row!(IncomeStatementRowDb);
impl_fact_row!(BalanceSheetRowDb);
impl_fact_row!(CashFlowRowDb);
