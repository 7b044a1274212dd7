use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use super::ledger_errors::{LedgerError, Result};
use super::ledger_model::PositionLot;

/// Cost-basis policy used to allocate a sell across open lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasisMethod {
    Fifo,
    Lifo,
    SpecificLot,
    AverageCost,
}

impl CostBasisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisMethod::Fifo => "fifo",
            CostBasisMethod::Lifo => "lifo",
            CostBasisMethod::SpecificLot => "specific",
            CostBasisMethod::AverageCost => "average",
        }
    }
}

impl FromStr for CostBasisMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(CostBasisMethod::Fifo),
            "lifo" => Ok(CostBasisMethod::Lifo),
            "specific" | "specific_lot" | "specificlot" => Ok(CostBasisMethod::SpecificLot),
            "average" | "average_cost" | "averagecost" => Ok(CostBasisMethod::AverageCost),
            other => Err(format!("unknown cost basis method '{}'", other)),
        }
    }
}

/// One caller-specified entry of a specific-lot plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificLotRequest {
    pub lot_id: String,
    pub quantity: Decimal,
}

/// One planned consumption of a lot. The plan always sums to the sell
/// quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct LotAllocation {
    pub lot_id: String,
    pub quantity: Decimal,
}

/// Produces the allocation plan for a sell. Pure: reads nothing beyond the
/// supplied lots, and identical inputs yield identical plans. Ties on
/// purchase date break by lot id ascending.
pub fn plan_allocations(
    method: CostBasisMethod,
    open_lots: &[PositionLot],
    quantity: Decimal,
    specific: Option<&[SpecificLotRequest]>,
) -> Result<Vec<LotAllocation>> {
    let available: Decimal = open_lots.iter().map(|lot| lot.remaining_quantity).sum();
    if available < quantity {
        return Err(LedgerError::InsufficientShares {
            requested: quantity,
            available,
        });
    }

    match method {
        CostBasisMethod::Fifo => Ok(consume_in_order(sorted_lots(open_lots, false), quantity)),
        CostBasisMethod::Lifo => Ok(consume_in_order(sorted_lots(open_lots, true), quantity)),
        CostBasisMethod::SpecificLot => {
            let plan = specific.ok_or_else(|| {
                LedgerError::InvalidInput("Specific-lot sells require a lot plan".to_string())
            })?;
            plan_specific(open_lots, quantity, plan)
        }
        CostBasisMethod::AverageCost => Ok(plan_average(open_lots, quantity)),
    }
}

fn sorted_lots(open_lots: &[PositionLot], newest_first: bool) -> Vec<&PositionLot> {
    let mut lots: Vec<&PositionLot> = open_lots
        .iter()
        .filter(|lot| lot.remaining_quantity > Decimal::ZERO)
        .collect();
    lots.sort_by(|a, b| {
        let ordering = a
            .purchase_date
            .cmp(&b.purchase_date)
            .then_with(|| a.id.cmp(&b.id));
        if newest_first {
            ordering.reverse()
        } else {
            ordering
        }
    });
    lots
}

fn consume_in_order(lots: Vec<&PositionLot>, quantity: Decimal) -> Vec<LotAllocation> {
    let mut plan = Vec::new();
    let mut remaining_to_sell = quantity;
    for lot in lots {
        if remaining_to_sell <= Decimal::ZERO {
            break;
        }
        let from_lot = lot.remaining_quantity.min(remaining_to_sell);
        plan.push(LotAllocation {
            lot_id: lot.id.clone(),
            quantity: from_lot,
        });
        remaining_to_sell -= from_lot;
    }
    plan
}

fn plan_specific(
    open_lots: &[PositionLot],
    quantity: Decimal,
    requests: &[SpecificLotRequest],
) -> Result<Vec<LotAllocation>> {
    let lots_by_id: HashMap<&str, &PositionLot> = open_lots
        .iter()
        .filter(|lot| lot.remaining_quantity > Decimal::ZERO)
        .map(|lot| (lot.id.as_str(), lot))
        .collect();

    let mut consumed: HashMap<&str, Decimal> = HashMap::new();
    let mut plan = Vec::new();
    let mut specified = Decimal::ZERO;

    for request in requests {
        if request.quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(
                "Specific-lot quantities must be greater than zero".to_string(),
            ));
        }
        let lot = lots_by_id
            .get(request.lot_id.as_str())
            .ok_or_else(|| LedgerError::LotUnavailable(request.lot_id.clone()))?;

        let already = consumed
            .get(request.lot_id.as_str())
            .copied()
            .unwrap_or(Decimal::ZERO);
        if lot.remaining_quantity - already < request.quantity {
            return Err(LedgerError::InsufficientShares {
                requested: request.quantity,
                available: lot.remaining_quantity - already,
            });
        }

        consumed.insert(lot.id.as_str(), already + request.quantity);
        specified += request.quantity;
        plan.push(LotAllocation {
            lot_id: request.lot_id.clone(),
            quantity: request.quantity,
        });
    }

    if specified != quantity {
        return Err(LedgerError::PlanQuantityMismatch {
            specified,
            requested: quantity,
        });
    }
    Ok(plan)
}

/// Pools all open lots at their weighted-average cost conceptually, but keeps
/// the per-lot ledger intact by allocating pro-rata on remaining quantity.
fn plan_average(open_lots: &[PositionLot], quantity: Decimal) -> Vec<LotAllocation> {
    let lots = sorted_lots(open_lots, false);
    let total_available: Decimal = lots.iter().map(|lot| lot.remaining_quantity).sum();
    if total_available <= Decimal::ZERO {
        return Vec::new();
    }

    let mut plan: Vec<LotAllocation> = Vec::with_capacity(lots.len());
    let mut remaining_to_sell = quantity;

    for (index, lot) in lots.iter().enumerate() {
        if remaining_to_sell <= Decimal::ZERO {
            break;
        }
        let from_lot = if index == lots.len() - 1 {
            remaining_to_sell.min(lot.remaining_quantity)
        } else {
            (quantity * lot.remaining_quantity / total_available)
                .min(lot.remaining_quantity)
                .min(remaining_to_sell)
        };
        if from_lot > Decimal::ZERO {
            plan.push(LotAllocation {
                lot_id: lot.id.clone(),
                quantity: from_lot,
            });
            remaining_to_sell -= from_lot;
        }
    }

    // Division rounding can leave a residue; sweep it into lots that still
    // have spare remaining quantity, in order.
    if remaining_to_sell > Decimal::ZERO {
        for lot in &lots {
            if remaining_to_sell <= Decimal::ZERO {
                break;
            }
            let planned = plan
                .iter()
                .filter(|entry| entry.lot_id == lot.id)
                .map(|entry| entry.quantity)
                .sum::<Decimal>();
            let spare = lot.remaining_quantity - planned;
            if spare <= Decimal::ZERO {
                continue;
            }
            let extra = spare.min(remaining_to_sell);
            match plan.iter_mut().find(|entry| entry.lot_id == lot.id) {
                Some(entry) => entry.quantity += extra,
                None => plan.push(LotAllocation {
                    lot_id: lot.id.clone(),
                    quantity: extra,
                }),
            }
            remaining_to_sell -= extra;
        }
    }

    plan
}
