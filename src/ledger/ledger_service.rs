use chrono::Utc;
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::ledger_errors::{LedgerError, Result};
use super::ledger_model::{
    BuyOutcome, NewBuy, NewSell, PositionLot, PositionSummary, SaleAllocation, SellOutcome,
    Transaction, TransactionKind,
};
use super::ledger_repository::LedgerRepository;
use super::matchers::plan_allocations;

/// The trading core. Each buy and each sell commits in exactly one storage
/// transaction; observers see the whole operation or none of it.
pub struct LotLedgerService {
    repository: Arc<LedgerRepository>,
}

impl LotLedgerService {
    pub fn new(repository: Arc<LedgerRepository>) -> Self {
        Self { repository }
    }

    /// Records a BUY and its position lot. Replaying a non-null
    /// `(owner, external_id)` returns the already-committed outcome instead
    /// of inserting twice.
    pub fn record_buy(&self, input: NewBuy) -> Result<BuyOutcome> {
        let date = input.validate()?;
        let symbol = input.symbol.trim().to_ascii_uppercase();
        info!(
            "Recording buy: {} {} {}@{}",
            input.owner_id, symbol, input.quantity, input.price
        );

        self.repository.with_transaction(|conn| {
            if let Some(external_id) = input.external_id.as_deref() {
                if let Some(existing) = LedgerRepository::find_transaction_by_external_id(
                    conn,
                    &input.owner_id,
                    external_id,
                )? {
                    if existing.kind != TransactionKind::Buy {
                        return Err(LedgerError::InvalidInput(format!(
                            "external id '{}' already references a {} transaction",
                            external_id,
                            existing.kind.as_str()
                        )));
                    }
                    let lot = LedgerRepository::lot_for_buy_transaction(conn, &existing.id)?
                        .ok_or_else(|| {
                            LedgerError::NotFound(format!("lot for transaction {}", existing.id))
                        })?;
                    debug!(
                        "Duplicate external id '{}', returning existing buy {}",
                        external_id, existing.id
                    );
                    return Ok(BuyOutcome {
                        transaction: existing,
                        lot,
                        duplicate: true,
                    });
                }
            }

            LedgerRepository::ensure_stock(conn, &symbol)?;

            let now = Utc::now();
            let transaction = Transaction {
                id: Uuid::new_v4().to_string(),
                owner_id: input.owner_id.clone(),
                symbol: symbol.clone(),
                kind: TransactionKind::Buy,
                quantity: input.quantity,
                price: input.price,
                commission: input.commission,
                transaction_date: date,
                external_id: input.external_id.clone(),
                notes: input.notes.clone(),
                created_at: now,
            };
            LedgerRepository::insert_transaction(conn, &transaction)?;

            // Commission is amortized into the per-share cost basis.
            let cost_basis_per_share = input.price + input.commission / input.quantity;
            let lot = PositionLot {
                id: Uuid::new_v4().to_string(),
                owner_id: input.owner_id.clone(),
                symbol: symbol.clone(),
                buy_transaction_id: transaction.id.clone(),
                original_quantity: input.quantity,
                remaining_quantity: input.quantity,
                cost_basis_per_share,
                purchase_date: date,
                is_closed: false,
                created_at: now,
                updated_at: now,
            };
            LedgerRepository::insert_lot(conn, &lot)?;

            Ok(BuyOutcome {
                transaction,
                lot,
                duplicate: false,
            })
        })
    }

    /// Records a SELL: allocates shares to open lots under the requested
    /// cost-basis policy, writes the allocation ledger, updates lot
    /// remainders and folds the day's realized PnL into `daily_pnl`, all in
    /// one transaction.
    pub fn record_sell(&self, input: NewSell) -> Result<SellOutcome> {
        let date = input.validate()?;
        let symbol = input.symbol.trim().to_ascii_uppercase();
        info!(
            "Recording sell: {} {} {}@{} ({})",
            input.owner_id,
            symbol,
            input.quantity,
            input.price,
            input.basis_method.as_str()
        );

        self.repository.with_transaction(|conn| {
            if let Some(external_id) = input.external_id.as_deref() {
                if let Some(existing) = LedgerRepository::find_transaction_by_external_id(
                    conn,
                    &input.owner_id,
                    external_id,
                )? {
                    if existing.kind != TransactionKind::Sell {
                        return Err(LedgerError::InvalidInput(format!(
                            "external id '{}' already references a {} transaction",
                            external_id,
                            existing.kind.as_str()
                        )));
                    }
                    let allocations =
                        LedgerRepository::allocations_for_sell_conn(conn, &existing.id)?;
                    let total_realized_pnl =
                        allocations.iter().map(|a| a.realized_pnl).sum();
                    debug!(
                        "Duplicate external id '{}', returning existing sell {}",
                        external_id, existing.id
                    );
                    return Ok(SellOutcome {
                        transaction: existing,
                        allocations,
                        total_realized_pnl,
                        duplicate: true,
                    });
                }
            }

            let mut open_lots = LedgerRepository::open_lots_conn(conn, &input.owner_id, &symbol)?;
            if open_lots.is_empty() {
                return Err(LedgerError::NoPosition {
                    owner_id: input.owner_id.clone(),
                    symbol: symbol.clone(),
                });
            }

            let plan = plan_allocations(
                input.basis_method,
                &open_lots,
                input.quantity,
                input.specific_lots.as_deref(),
            )?;

            let now = Utc::now();
            let transaction = Transaction {
                id: Uuid::new_v4().to_string(),
                owner_id: input.owner_id.clone(),
                symbol: symbol.clone(),
                kind: TransactionKind::Sell,
                quantity: input.quantity,
                price: input.price,
                commission: input.commission,
                transaction_date: date,
                external_id: input.external_id.clone(),
                notes: input.notes.clone(),
                created_at: now,
            };
            LedgerRepository::insert_transaction(conn, &transaction)?;

            let mut allocations = Vec::with_capacity(plan.len());
            let mut total_realized_pnl = Decimal::ZERO;

            for entry in &plan {
                let lot = open_lots
                    .iter_mut()
                    .find(|lot| lot.id == entry.lot_id)
                    .ok_or_else(|| LedgerError::LotUnavailable(entry.lot_id.clone()))?;

                // Commission is allocated proportionally by quantity.
                let allocated_commission =
                    input.commission * entry.quantity / input.quantity;
                let realized_pnl = (input.price - lot.cost_basis_per_share) * entry.quantity
                    - allocated_commission;

                let allocation = SaleAllocation {
                    id: Uuid::new_v4().to_string(),
                    sell_transaction_id: transaction.id.clone(),
                    lot_id: lot.id.clone(),
                    quantity_sold: entry.quantity,
                    cost_basis_per_share: lot.cost_basis_per_share,
                    sale_price_per_share: input.price,
                    realized_pnl,
                    created_at: now,
                };
                LedgerRepository::insert_allocation(conn, &allocation)?;

                let new_remaining = lot.remaining_quantity - entry.quantity;
                let is_closed = new_remaining.is_zero();
                LedgerRepository::update_lot_remaining(
                    conn,
                    &lot.id,
                    new_remaining,
                    is_closed,
                )?;
                lot.remaining_quantity = new_remaining;
                lot.is_closed = is_closed;

                total_realized_pnl += realized_pnl;
                debug!(
                    "Allocated {} from lot {} (cost {}, pnl {})",
                    entry.quantity, lot.id, allocation.cost_basis_per_share, realized_pnl
                );
                allocations.push(allocation);
            }

            let still_open: Vec<PositionLot> = open_lots
                .iter()
                .filter(|lot| !lot.is_closed)
                .cloned()
                .collect();
            LedgerRepository::fold_realized_pnl_into_daily(
                conn,
                &input.owner_id,
                &symbol,
                date,
                total_realized_pnl,
                &still_open,
            )?;

            info!(
                "Sell {} committed: realized pnl {}, {} lots touched",
                transaction.id,
                total_realized_pnl,
                allocations.len()
            );
            Ok(SellOutcome {
                transaction,
                allocations,
                total_realized_pnl,
                duplicate: false,
            })
        })
    }

    pub fn get_open_lots(&self, owner_id: &str, symbol: &str) -> Result<Vec<PositionLot>> {
        self.repository
            .get_open_lots(owner_id, &symbol.trim().to_ascii_uppercase())
    }

    pub fn get_lots(&self, owner_id: &str, symbol: Option<&str>) -> Result<Vec<PositionLot>> {
        self.repository.get_lots(owner_id, symbol)
    }

    pub fn get_allocations(
        &self,
        owner_id: &str,
        symbol: &str,
    ) -> Result<Vec<SaleAllocation>> {
        Ok(self
            .repository
            .get_allocations_with_sell_dates(owner_id, &symbol.trim().to_ascii_uppercase())?
            .into_iter()
            .map(|(allocation, _)| allocation)
            .collect())
    }

    pub fn get_transactions(
        &self,
        owner_id: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Transaction>> {
        self.repository.get_transactions(owner_id, symbol, None, None)
    }

    /// Aggregates lots into per-symbol position summaries; symbols whose
    /// position is fully closed are dropped.
    pub fn get_position_summaries(&self, owner_id: &str) -> Result<Vec<PositionSummary>> {
        let lots = self.repository.get_lots(owner_id, None)?;

        let mut by_symbol: BTreeMap<String, Vec<PositionLot>> = BTreeMap::new();
        for lot in lots {
            by_symbol.entry(lot.symbol.clone()).or_default().push(lot);
        }

        Ok(by_symbol
            .into_iter()
            .map(|(symbol, lots)| PositionSummary::from_lots(owner_id, &symbol, &lots))
            .filter(|summary| summary.is_active())
            .collect())
    }
}
