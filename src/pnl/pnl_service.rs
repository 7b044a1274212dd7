use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use super::pnl_errors::{PnlError, Result};
use super::pnl_model::{BatchPnlSummary, DailyPnl};
use super::pnl_repository::PnlRepository;
use crate::config::{AppConfig, MissingPriceStrategy};
use crate::ledger::LedgerRepository;
use crate::market_data::{MarketDataRepositoryTrait, PriceBar};
use crate::utils::time_utils::get_days_between;

/// Mark-to-market valuation over the persisted price series and lot ledger.
/// `compute_daily` is reproducible: it re-derives everything from the
/// allocation ledger rather than trusting prior rows.
pub struct PnlCalculator {
    market_data: Arc<dyn MarketDataRepositoryTrait>,
    ledger: Arc<LedgerRepository>,
    repository: Arc<PnlRepository>,
    config: AppConfig,
}

struct EffectivePosition {
    quantity: Decimal,
    total_cost: Decimal,
    realized_day: Decimal,
}

impl PnlCalculator {
    pub fn new(
        market_data: Arc<dyn MarketDataRepositoryTrait>,
        ledger: Arc<LedgerRepository>,
        repository: Arc<PnlRepository>,
        config: AppConfig,
    ) -> Self {
        Self {
            market_data,
            ledger,
            repository,
            config,
        }
    }

    /// Values the open position for `(owner, symbol)` at end of `date` and
    /// upserts the daily PnL row. Returns `None` when there is nothing to
    /// value for that day.
    pub fn compute_daily(
        &self,
        owner_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyPnl>> {
        let symbol = symbol.trim().to_ascii_uppercase();
        debug!("Computing daily PnL for {}/{} at {}", owner_id, symbol, date);

        let position = self.effective_position(owner_id, &symbol, date)?;
        if position.quantity.is_zero() && position.realized_day.is_zero() {
            debug!("No position for {}/{} at {}", owner_id, symbol, date);
            return Ok(None);
        }

        let (bar, is_stale) = self.market_price(&symbol, date)?;
        let market_price = bar.price(self.config.price_source);
        if is_stale {
            warn!(
                "{}: no price at {}, back-filled from {}",
                symbol, date, bar.date
            );
        }

        let quantity = position.quantity;
        let total_cost = position.total_cost;
        let market_value = quantity * market_price;
        let unrealized_pnl = market_value - total_cost;
        let weighted_avg_cost = if quantity > Decimal::ZERO {
            total_cost / quantity
        } else {
            Decimal::ZERO
        };
        let unrealized_pnl_pct = if total_cost > Decimal::ZERO {
            unrealized_pnl / total_cost
        } else {
            Decimal::ZERO
        };
        let realized_pnl_pct = if total_cost > Decimal::ZERO {
            position.realized_day / total_cost
        } else {
            Decimal::ZERO
        };

        let row = DailyPnl {
            owner_id: owner_id.to_string(),
            symbol: symbol.clone(),
            valuation_date: date,
            quantity,
            weighted_avg_cost,
            market_price,
            market_value,
            unrealized_pnl,
            unrealized_pnl_pct,
            realized_pnl_day: position.realized_day,
            realized_pnl_pct,
            total_cost,
            price_date: Some(bar.date),
            is_stale_price: is_stale,
            calculated_at: Utc::now(),
        };
        self.repository.upsert_daily_pnl(&row)?;

        debug!(
            "{}/{} at {}: qty {}, unrealized {}, realized {}",
            owner_id, symbol, date, quantity, unrealized_pnl, position.realized_day
        );
        Ok(Some(row))
    }

    /// Values every active symbol of the owner over a date range. Failures
    /// are collected, not propagated; the summary reports partial success.
    pub fn batch_compute(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        only_trading_days: bool,
    ) -> Result<BatchPnlSummary> {
        if start > end {
            return Err(PnlError::InvalidInput(
                "start date is after end date".to_string(),
            ));
        }

        let symbols = self.ledger.get_active_symbols(owner_id)?;
        let dates = if only_trading_days {
            self.market_data.get_trading_days(start, end)?
        } else {
            get_days_between(start, end)
        };
        info!(
            "Batch PnL for {}: {} symbols over {} dates",
            owner_id,
            symbols.len(),
            dates.len()
        );

        let mut summary = BatchPnlSummary::default();
        for date in &dates {
            for symbol in &symbols {
                match self.compute_daily(owner_id, symbol, *date) {
                    Ok(Some(_)) => summary.computed += 1,
                    Ok(None) => summary.skipped += 1,
                    Err(e) => {
                        summary.failed += 1;
                        summary
                            .failures
                            .push((*date, symbol.clone(), e.to_string()));
                    }
                }
            }
        }

        info!(
            "Batch PnL complete: {} computed, {} skipped, {} failed",
            summary.computed, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    pub fn get_daily_pnl(
        &self,
        owner_id: &str,
        symbol: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyPnl>> {
        self.repository.get_daily_pnl(owner_id, symbol, start, end)
    }

    /// Replays the allocation ledger up to `date` to derive the effective
    /// open quantity and cost at end of day, plus the realized PnL of sells
    /// dated exactly `date`.
    fn effective_position(
        &self,
        owner_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<EffectivePosition> {
        let lots = self.ledger.get_lots(owner_id, Some(symbol))?;
        let allocations = self.ledger.get_allocations_with_sell_dates(owner_id, symbol)?;

        let mut consumed_by_lot: HashMap<&str, Decimal> = HashMap::new();
        let mut realized_day = Decimal::ZERO;
        for (allocation, sell_date) in &allocations {
            if *sell_date <= date {
                *consumed_by_lot
                    .entry(allocation.lot_id.as_str())
                    .or_insert(Decimal::ZERO) += allocation.quantity_sold;
            }
            if *sell_date == date {
                realized_day += allocation.realized_pnl;
            }
        }

        let mut quantity = Decimal::ZERO;
        let mut total_cost = Decimal::ZERO;
        for lot in &lots {
            if lot.purchase_date > date {
                continue;
            }
            let consumed = consumed_by_lot
                .get(lot.id.as_str())
                .copied()
                .unwrap_or(Decimal::ZERO);
            let effective_remaining = lot.original_quantity - consumed;
            if effective_remaining > Decimal::ZERO {
                quantity += effective_remaining;
                total_cost += effective_remaining * lot.cost_basis_per_share;
            }
        }

        Ok(EffectivePosition {
            quantity,
            total_cost,
            realized_day,
        })
    }

    /// Price for the valuation date under the configured missing-price
    /// strategy. The bool marks a back-filled (stale) price.
    fn market_price(&self, symbol: &str, date: NaiveDate) -> Result<(PriceBar, bool)> {
        if let Some(bar) = self.market_data.get_price_at(symbol, date)? {
            return Ok((bar, false));
        }
        match self.config.missing_price_strategy {
            MissingPriceStrategy::Strict => Err(PnlError::NoPrice {
                symbol: symbol.to_string(),
                date,
            }),
            MissingPriceStrategy::Backfill => self
                .market_data
                .get_price_at_or_before(symbol, date)?
                .map(|bar| (bar, true))
                .ok_or(PnlError::NoPrice {
                    symbol: symbol.to_string(),
                    date,
                }),
        }
    }
}
