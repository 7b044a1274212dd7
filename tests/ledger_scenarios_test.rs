use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use lotfolio::ledger::{
    CostBasisMethod, LedgerError, LedgerRepository, LotLedgerService, NewBuy, NewSell,
    SpecificLotRequest,
};

mod common;

fn service() -> (LotLedgerService, Arc<LedgerRepository>) {
    let pool = common::get_db_connection_pool();
    let repository = Arc::new(LedgerRepository::new(pool));
    (LotLedgerService::new(repository.clone()), repository)
}

fn buy(owner: &str, quantity: Decimal, price: Decimal, date: &str) -> NewBuy {
    NewBuy {
        owner_id: owner.to_string(),
        symbol: "AAPL".to_string(),
        quantity,
        price,
        commission: Decimal::ZERO,
        transaction_date: date.to_string(),
        external_id: None,
        notes: None,
    }
}

fn sell(
    owner: &str,
    quantity: Decimal,
    price: Decimal,
    date: &str,
    basis_method: CostBasisMethod,
) -> NewSell {
    NewSell {
        owner_id: owner.to_string(),
        symbol: "AAPL".to_string(),
        quantity,
        price,
        commission: Decimal::ZERO,
        transaction_date: date.to_string(),
        basis_method,
        specific_lots: None,
        external_id: None,
        notes: None,
    }
}

/// Seeds the canonical two-lot position: 100 @ 150 then 50 @ 160.
fn seed_two_lots(ledger: &LotLedgerService, owner: &str) -> (String, String) {
    let first = ledger.record_buy(buy(owner, dec!(100), dec!(150), "2024-01-15")).unwrap();
    let second = ledger.record_buy(buy(owner, dec!(50), dec!(160), "2024-02-01")).unwrap();
    (first.lot.id, second.lot.id)
}

#[test]
fn fifo_sell_allocates_across_two_lots() {
    let (ledger, _) = service();
    let (lot1, lot2) = seed_two_lots(&ledger, "u1");

    let outcome = ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap();

    assert_eq!(outcome.allocations.len(), 2);
    let first = &outcome.allocations[0];
    assert_eq!(first.lot_id, lot1);
    assert_eq!(first.quantity_sold, dec!(100));
    assert_eq!(first.cost_basis_per_share, dec!(150));
    assert_eq!(first.realized_pnl, dec!(2000));
    let second = &outcome.allocations[1];
    assert_eq!(second.lot_id, lot2);
    assert_eq!(second.quantity_sold, dec!(20));
    assert_eq!(second.cost_basis_per_share, dec!(160));
    assert_eq!(second.realized_pnl, dec!(200));
    assert_eq!(outcome.total_realized_pnl, dec!(2200));

    let lots = ledger.get_lots("u1", Some("AAPL")).unwrap();
    let l1 = lots.iter().find(|l| l.id == lot1).unwrap();
    let l2 = lots.iter().find(|l| l.id == lot2).unwrap();
    assert!(l1.is_closed);
    assert_eq!(l1.remaining_quantity, dec!(0));
    assert!(!l2.is_closed);
    assert_eq!(l2.remaining_quantity, dec!(30));
}

#[test]
fn lifo_sell_consumes_newest_lot_first() {
    let (ledger, _) = service();
    let (lot1, lot2) = seed_two_lots(&ledger, "u1");

    let outcome = ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Lifo))
        .unwrap();

    let first = &outcome.allocations[0];
    assert_eq!(first.lot_id, lot2);
    assert_eq!(first.quantity_sold, dec!(50));
    assert_eq!(first.realized_pnl, dec!(500));
    let second = &outcome.allocations[1];
    assert_eq!(second.lot_id, lot1);
    assert_eq!(second.quantity_sold, dec!(70));
    assert_eq!(second.realized_pnl, dec!(1400));
    assert_eq!(outcome.total_realized_pnl, dec!(1900));

    let lots = ledger.get_lots("u1", Some("AAPL")).unwrap();
    assert!(lots.iter().find(|l| l.id == lot2).unwrap().is_closed);
    assert_eq!(
        lots.iter().find(|l| l.id == lot1).unwrap().remaining_quantity,
        dec!(30)
    );
}

#[test]
fn specific_lot_sell_follows_caller_plan() {
    let (ledger, _) = service();
    let (lot1, lot2) = seed_two_lots(&ledger, "u1");

    let mut request = sell("u1", dec!(60), dec!(170), "2024-03-01", CostBasisMethod::SpecificLot);
    request.specific_lots = Some(vec![
        SpecificLotRequest { lot_id: lot1.clone(), quantity: dec!(40) },
        SpecificLotRequest { lot_id: lot2.clone(), quantity: dec!(20) },
    ]);
    let outcome = ledger.record_sell(request).unwrap();

    assert_eq!(outcome.allocations[0].lot_id, lot1);
    assert_eq!(outcome.allocations[0].quantity_sold, dec!(40));
    assert_eq!(outcome.allocations[1].lot_id, lot2);
    assert_eq!(outcome.allocations[1].quantity_sold, dec!(20));

    let lots = ledger.get_lots("u1", Some("AAPL")).unwrap();
    assert_eq!(
        lots.iter().find(|l| l.id == lot1).unwrap().remaining_quantity,
        dec!(60)
    );
    assert_eq!(
        lots.iter().find(|l| l.id == lot2).unwrap().remaining_quantity,
        dec!(30)
    );
}

#[test]
fn average_cost_sell_allocates_pro_rata() {
    let (ledger, _) = service();
    let (lot1, lot2) = seed_two_lots(&ledger, "u1");

    let outcome = ledger
        .record_sell(sell("u1", dec!(90), dec!(170), "2024-03-01", CostBasisMethod::AverageCost))
        .unwrap();

    let total: Decimal = outcome.allocations.iter().map(|a| a.quantity_sold).sum();
    assert_eq!(total, dec!(90));
    assert_eq!(outcome.allocations[0].lot_id, lot1);
    assert_eq!(outcome.allocations[0].quantity_sold, dec!(60));
    assert_eq!(outcome.allocations[1].lot_id, lot2);
    assert_eq!(outcome.allocations[1].quantity_sold, dec!(30));
}

#[test]
fn oversell_fails_with_no_writes() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");
    ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap();

    let error = ledger
        .record_sell(sell("u1", dec!(100), dec!(180), "2024-03-02", CostBasisMethod::Fifo))
        .unwrap_err();
    match error {
        LedgerError::InsufficientShares { requested, available } => {
            assert_eq!(requested, dec!(100));
            assert_eq!(available, dec!(30));
        }
        other => panic!("unexpected error {:?}", other),
    }

    // The failed sell must leave nothing behind.
    let transactions = ledger.get_transactions("u1", Some("AAPL")).unwrap();
    assert_eq!(transactions.len(), 3);
    let allocations = ledger.get_allocations("u1", "AAPL").unwrap();
    assert_eq!(allocations.len(), 2);
}

#[test]
fn sell_quantity_equals_sum_of_allocations() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");

    let outcome = ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap();
    let allocated: Decimal = outcome.allocations.iter().map(|a| a.quantity_sold).sum();
    assert_eq!(outcome.transaction.quantity, allocated);
}

#[test]
fn lot_conservation_holds_after_sells() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");
    ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap();
    ledger
        .record_sell(sell("u1", dec!(10), dec!(175), "2024-03-05", CostBasisMethod::Fifo))
        .unwrap();

    let lots = ledger.get_lots("u1", Some("AAPL")).unwrap();
    let allocations = ledger.get_allocations("u1", "AAPL").unwrap();
    let original: Decimal = lots.iter().map(|l| l.original_quantity).sum();
    let remaining: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    let sold: Decimal = allocations.iter().map(|a| a.quantity_sold).sum();
    assert_eq!(original, remaining + sold);

    for lot in &lots {
        assert!(lot.remaining_quantity >= Decimal::ZERO);
        assert_eq!(lot.is_closed, lot.remaining_quantity.is_zero());
    }
}

#[test]
fn buy_commission_is_amortized_into_cost_basis() {
    let (ledger, _) = service();
    let mut order = buy("u1", dec!(100), dec!(150), "2024-01-15");
    order.commission = dec!(10);
    let outcome = ledger.record_buy(order).unwrap();
    assert_eq!(outcome.lot.cost_basis_per_share, dec!(150.1));
}

#[test]
fn sell_commission_is_allocated_proportionally() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");

    let mut request = sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo);
    request.commission = dec!(12);
    let outcome = ledger.record_sell(request).unwrap();

    // 100/120 and 20/120 of the 12 commission.
    assert_eq!(outcome.allocations[0].realized_pnl, dec!(1990));
    assert_eq!(outcome.allocations[1].realized_pnl, dec!(198));
    assert_eq!(outcome.total_realized_pnl, dec!(2188));
}

#[test]
fn duplicate_external_id_is_idempotent_for_buys() {
    let (ledger, _) = service();
    let mut order = buy("u1", dec!(100), dec!(150), "2024-01-15");
    order.external_id = Some("broker-42".to_string());

    let first = ledger.record_buy(order.clone()).unwrap();
    let second = ledger.record_buy(order).unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(first.lot.id, second.lot.id);
    assert_eq!(ledger.get_transactions("u1", Some("AAPL")).unwrap().len(), 1);
    assert_eq!(ledger.get_lots("u1", Some("AAPL")).unwrap().len(), 1);
}

#[test]
fn duplicate_external_id_is_idempotent_for_sells() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");

    let mut request = sell("u1", dec!(30), dec!(170), "2024-03-01", CostBasisMethod::Fifo);
    request.external_id = Some("broker-43".to_string());

    let first = ledger.record_sell(request.clone()).unwrap();
    let second = ledger.record_sell(request).unwrap();

    assert!(second.duplicate);
    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(first.allocations.len(), second.allocations.len());
    assert_eq!(first.total_realized_pnl, second.total_realized_pnl);
    // Still a single sell's worth of lot consumption.
    let lots = ledger.get_lots("u1", Some("AAPL")).unwrap();
    let remaining: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    assert_eq!(remaining, dec!(120));
}

#[test]
fn owners_are_isolated_from_each_other() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");
    ledger.record_buy(buy("u2", dec!(10), dec!(100), "2024-01-20")).unwrap();

    let error = ledger
        .record_sell(sell("u2", dec!(50), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap_err();
    assert!(matches!(error, LedgerError::InsufficientShares { .. }));

    let summaries = ledger.get_position_summaries("u2").unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].total_quantity, dec!(10));
}

#[test]
fn position_summary_reflects_open_lots() {
    let (ledger, _) = service();
    seed_two_lots(&ledger, "u1");
    ledger
        .record_sell(sell("u1", dec!(120), dec!(170), "2024-03-01", CostBasisMethod::Fifo))
        .unwrap();

    let summaries = ledger.get_position_summaries("u1").unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.symbol, "AAPL");
    assert_eq!(summary.total_quantity, dec!(30));
    assert_eq!(summary.avg_cost, dec!(160));
    assert_eq!(summary.total_cost, dec!(4800));
    assert_eq!(summary.lot_count, 1);
    assert_eq!(summary.closed_lot_count, 1);
}
