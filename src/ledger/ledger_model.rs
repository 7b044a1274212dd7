use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ledger_errors::{LedgerError, Result};
use super::matchers::{CostBasisMethod, SpecificLotRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Buy,
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionKind::Buy),
            "SELL" => Ok(TransactionKind::Sell),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Domain model for a committed trade. Immutable after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub kind: TransactionKind,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub transaction_date: NaiveDate,
    pub external_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database model for transactions
#[derive(Queryable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TransactionDb {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub kind: String,
    pub quantity: String,
    pub price: String,
    pub commission: String,
    pub transaction_date: NaiveDate,
    pub external_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<&Transaction> for TransactionDb {
    fn from(txn: &Transaction) -> Self {
        TransactionDb {
            id: txn.id.clone(),
            owner_id: txn.owner_id.clone(),
            symbol: txn.symbol.clone(),
            kind: txn.kind.as_str().to_string(),
            quantity: txn.quantity.to_string(),
            price: txn.price.to_string(),
            commission: txn.commission.to_string(),
            transaction_date: txn.transaction_date,
            external_id: txn.external_id.clone(),
            notes: txn.notes.clone(),
            created_at: txn.created_at.naive_utc(),
        }
    }
}

impl From<TransactionDb> for Transaction {
    fn from(row: TransactionDb) -> Self {
        Transaction {
            id: row.id,
            owner_id: row.owner_id,
            symbol: row.symbol,
            kind: row.kind.parse().unwrap_or(TransactionKind::Buy),
            quantity: Decimal::from_str(&row.quantity).unwrap_or_default(),
            price: Decimal::from_str(&row.price).unwrap_or_default(),
            commission: Decimal::from_str(&row.commission).unwrap_or_default(),
            transaction_date: row.transaction_date,
            external_id: row.external_id,
            notes: row.notes,
            created_at: Utc.from_utc_datetime(&row.created_at),
        }
    }
}

/// One buy's shares, tracked until fully sold. `remaining_quantity` only
/// moves inside the storage transaction of the SELL consuming it; the row
/// itself is never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionLot {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub buy_transaction_id: String,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub cost_basis_per_share: Decimal,
    pub purchase_date: NaiveDate,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::position_lots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PositionLotDb {
    pub id: String,
    pub owner_id: String,
    pub symbol: String,
    pub buy_transaction_id: String,
    pub original_quantity: String,
    pub remaining_quantity: String,
    pub cost_basis_per_share: String,
    pub purchase_date: NaiveDate,
    pub is_closed: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&PositionLot> for PositionLotDb {
    fn from(lot: &PositionLot) -> Self {
        PositionLotDb {
            id: lot.id.clone(),
            owner_id: lot.owner_id.clone(),
            symbol: lot.symbol.clone(),
            buy_transaction_id: lot.buy_transaction_id.clone(),
            original_quantity: lot.original_quantity.to_string(),
            remaining_quantity: lot.remaining_quantity.to_string(),
            cost_basis_per_share: lot.cost_basis_per_share.to_string(),
            purchase_date: lot.purchase_date,
            is_closed: lot.is_closed,
            created_at: lot.created_at.naive_utc(),
            updated_at: lot.updated_at.naive_utc(),
        }
    }
}

impl From<PositionLotDb> for PositionLot {
    fn from(row: PositionLotDb) -> Self {
        PositionLot {
            id: row.id,
            owner_id: row.owner_id,
            symbol: row.symbol,
            buy_transaction_id: row.buy_transaction_id,
            original_quantity: Decimal::from_str(&row.original_quantity).unwrap_or_default(),
            remaining_quantity: Decimal::from_str(&row.remaining_quantity).unwrap_or_default(),
            cost_basis_per_share: Decimal::from_str(&row.cost_basis_per_share)
                .unwrap_or_default(),
            purchase_date: row.purchase_date,
            is_closed: row.is_closed,
            created_at: Utc.from_utc_datetime(&row.created_at),
            updated_at: Utc.from_utc_datetime(&row.updated_at),
        }
    }
}

impl PositionLot {
    /// Cost of the still-held shares.
    pub fn remaining_cost(&self) -> Decimal {
        self.remaining_quantity * self.cost_basis_per_share
    }
}

/// Append-only record binding part of a SELL to one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleAllocation {
    pub id: String,
    pub sell_transaction_id: String,
    pub lot_id: String,
    pub quantity_sold: Decimal,
    pub cost_basis_per_share: Decimal,
    pub sale_price_per_share: Decimal,
    pub realized_pnl: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::sale_allocations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SaleAllocationDb {
    pub id: String,
    pub sell_transaction_id: String,
    pub lot_id: String,
    pub quantity_sold: String,
    pub cost_basis_per_share: String,
    pub sale_price_per_share: String,
    pub realized_pnl: String,
    pub created_at: NaiveDateTime,
}

impl From<&SaleAllocation> for SaleAllocationDb {
    fn from(alloc: &SaleAllocation) -> Self {
        SaleAllocationDb {
            id: alloc.id.clone(),
            sell_transaction_id: alloc.sell_transaction_id.clone(),
            lot_id: alloc.lot_id.clone(),
            quantity_sold: alloc.quantity_sold.to_string(),
            cost_basis_per_share: alloc.cost_basis_per_share.to_string(),
            sale_price_per_share: alloc.sale_price_per_share.to_string(),
            realized_pnl: alloc.realized_pnl.to_string(),
            created_at: alloc.created_at.naive_utc(),
        }
    }
}

impl From<SaleAllocationDb> for SaleAllocation {
    fn from(row: SaleAllocationDb) -> Self {
        SaleAllocation {
            id: row.id,
            sell_transaction_id: row.sell_transaction_id,
            lot_id: row.lot_id,
            quantity_sold: Decimal::from_str(&row.quantity_sold).unwrap_or_default(),
            cost_basis_per_share: Decimal::from_str(&row.cost_basis_per_share)
                .unwrap_or_default(),
            sale_price_per_share: Decimal::from_str(&row.sale_price_per_share)
                .unwrap_or_default(),
            realized_pnl: Decimal::from_str(&row.realized_pnl).unwrap_or_default(),
            created_at: Utc.from_utc_datetime(&row.created_at),
        }
    }
}

/// Input model for recording a buy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBuy {
    pub owner_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub transaction_date: String,
    pub external_id: Option<String>,
    pub notes: Option<String>,
}

/// Input model for recording a sell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSell {
    pub owner_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub transaction_date: String,
    pub basis_method: CostBasisMethod,
    pub specific_lots: Option<Vec<SpecificLotRequest>>,
    pub external_id: Option<String>,
    pub notes: Option<String>,
}

fn validate_trade_fields(
    owner_id: &str,
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    transaction_date: &str,
) -> Result<NaiveDate> {
    if owner_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput(
            "Owner ID cannot be empty".to_string(),
        ));
    }
    if symbol.trim().is_empty() {
        return Err(LedgerError::InvalidInput(
            "Symbol cannot be empty".to_string(),
        ));
    }
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "Quantity must be greater than zero".to_string(),
        ));
    }
    if price < Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "Price cannot be negative".to_string(),
        ));
    }
    if commission < Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "Commission cannot be negative".to_string(),
        ));
    }
    NaiveDate::parse_from_str(transaction_date, "%Y-%m-%d").map_err(|_| {
        LedgerError::InvalidInput("Invalid date format. Expected YYYY-MM-DD".to_string())
    })
}

impl NewBuy {
    /// Validates the input and returns the parsed trade date.
    pub fn validate(&self) -> Result<NaiveDate> {
        validate_trade_fields(
            &self.owner_id,
            &self.symbol,
            self.quantity,
            self.price,
            self.commission,
            &self.transaction_date,
        )
    }
}

impl NewSell {
    /// Validates the input and returns the parsed trade date.
    pub fn validate(&self) -> Result<NaiveDate> {
        let date = validate_trade_fields(
            &self.owner_id,
            &self.symbol,
            self.quantity,
            self.price,
            self.commission,
            &self.transaction_date,
        )?;
        if self.basis_method == CostBasisMethod::SpecificLot
            && self
                .specific_lots
                .as_ref()
                .map(|lots| lots.is_empty())
                .unwrap_or(true)
        {
            return Err(LedgerError::InvalidInput(
                "Specific-lot sells require a lot plan".to_string(),
            ));
        }
        Ok(date)
    }
}

/// Result of a committed (or idempotently replayed) buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyOutcome {
    pub transaction: Transaction,
    pub lot: PositionLot,
    pub duplicate: bool,
}

/// Result of a committed (or idempotently replayed) sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellOutcome {
    pub transaction: Transaction,
    pub allocations: Vec<SaleAllocation>,
    pub total_realized_pnl: Decimal,
    pub duplicate: bool,
}

/// Per-symbol holdings view computed from lots; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSummary {
    pub owner_id: String,
    pub symbol: String,
    pub total_quantity: Decimal,
    pub total_cost: Decimal,
    pub avg_cost: Decimal,
    pub first_buy_date: Option<NaiveDate>,
    pub last_transaction_date: Option<NaiveDate>,
    pub lot_count: usize,
    pub closed_lot_count: usize,
}

impl PositionSummary {
    pub fn from_lots(owner_id: &str, symbol: &str, lots: &[PositionLot]) -> Self {
        let open_lots: Vec<&PositionLot> = lots.iter().filter(|lot| !lot.is_closed).collect();
        let total_quantity: Decimal = open_lots.iter().map(|lot| lot.remaining_quantity).sum();
        let total_cost: Decimal = open_lots.iter().map(|lot| lot.remaining_cost()).sum();
        let avg_cost = if total_quantity > Decimal::ZERO {
            total_cost / total_quantity
        } else {
            Decimal::ZERO
        };

        PositionSummary {
            owner_id: owner_id.to_string(),
            symbol: symbol.to_string(),
            total_quantity,
            total_cost,
            avg_cost,
            first_buy_date: lots.iter().map(|lot| lot.purchase_date).min(),
            last_transaction_date: lots.iter().map(|lot| lot.purchase_date).max(),
            lot_count: open_lots.len(),
            closed_lot_count: lots.iter().filter(|lot| lot.is_closed).count(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.total_quantity > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(quantity: Decimal, price: Decimal) -> NewBuy {
        NewBuy {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            quantity,
            price,
            commission: Decimal::ZERO,
            transaction_date: "2024-01-15".to_string(),
            external_id: None,
            notes: None,
        }
    }

    #[test]
    fn buy_validation_accepts_fractional_quantities() {
        assert!(buy(dec!(0.5), dec!(150)).validate().is_ok());
    }

    #[test]
    fn buy_validation_rejects_bad_inputs() {
        assert!(buy(dec!(0), dec!(150)).validate().is_err());
        assert!(buy(dec!(-1), dec!(150)).validate().is_err());
        assert!(buy(dec!(1), dec!(-1)).validate().is_err());

        let mut bad_date = buy(dec!(1), dec!(150));
        bad_date.transaction_date = "01/15/2024".to_string();
        assert!(bad_date.validate().is_err());

        let mut bad_owner = buy(dec!(1), dec!(150));
        bad_owner.owner_id = "  ".to_string();
        assert!(bad_owner.validate().is_err());
    }

    #[test]
    fn sell_validation_requires_plan_for_specific_lots() {
        let sell = NewSell {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(10),
            price: dec!(170),
            commission: Decimal::ZERO,
            transaction_date: "2024-03-01".to_string(),
            basis_method: CostBasisMethod::SpecificLot,
            specific_lots: None,
            external_id: None,
            notes: None,
        };
        assert!(sell.validate().is_err());
    }

    #[test]
    fn summary_aggregates_open_lots_only() {
        let open = PositionLot {
            id: "l1".to_string(),
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            buy_transaction_id: "t1".to_string(),
            original_quantity: dec!(100),
            remaining_quantity: dec!(30),
            cost_basis_per_share: dec!(150),
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            is_closed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let closed = PositionLot {
            id: "l2".to_string(),
            remaining_quantity: Decimal::ZERO,
            is_closed: true,
            purchase_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            ..open.clone()
        };

        let summary = PositionSummary::from_lots("u1", "AAPL", &[open, closed]);
        assert_eq!(summary.total_quantity, dec!(30));
        assert_eq!(summary.total_cost, dec!(4500));
        assert_eq!(summary.avg_cost, dec!(150));
        assert_eq!(summary.lot_count, 1);
        assert_eq!(summary.closed_lot_count, 1);
        assert_eq!(
            summary.first_buy_date,
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            summary.last_transaction_date,
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }
}
