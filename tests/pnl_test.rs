use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use lotfolio::config::{AppConfig, MissingPriceStrategy};
use lotfolio::ledger::{CostBasisMethod, LedgerRepository, LotLedgerService, NewBuy, NewSell};
use lotfolio::market_data::{
    MarketDataRepository, MarketDataRepositoryTrait, PriceBar,
};
use lotfolio::pnl::{PnlCalculator, PnlError, PnlRepository};

mod common;

struct Harness {
    market_repo: Arc<dyn MarketDataRepositoryTrait>,
    ledger: LotLedgerService,
    pnl_repo: Arc<PnlRepository>,
    ledger_repo: Arc<LedgerRepository>,
}

fn harness() -> Harness {
    let pool = common::get_db_connection_pool();
    let market_repo: Arc<dyn MarketDataRepositoryTrait> =
        Arc::new(MarketDataRepository::new(pool.clone()));
    let ledger_repo = Arc::new(LedgerRepository::new(pool.clone()));
    Harness {
        market_repo,
        ledger: LotLedgerService::new(ledger_repo.clone()),
        pnl_repo: Arc::new(PnlRepository::new(pool)),
        ledger_repo,
    }
}

fn calculator(h: &Harness, config: AppConfig) -> PnlCalculator {
    PnlCalculator::new(
        h.market_repo.clone(),
        h.ledger_repo.clone(),
        h.pnl_repo.clone(),
        config,
    )
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn seed_price(h: &Harness, day: &str, close: Decimal) {
    h.market_repo.ensure_stock("AAPL").unwrap();
    h.market_repo
        .save_price_bars(&[PriceBar {
            symbol: "AAPL".to_string(),
            date: date(day),
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close,
            adj_close: close,
            volume: 1000,
        }])
        .unwrap();
}

/// Two buys and a FIFO sell leaving 30 shares @ 160.
fn seed_s1_position(h: &Harness) {
    h.ledger
        .record_buy(NewBuy {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(100),
            price: dec!(150),
            commission: Decimal::ZERO,
            transaction_date: "2024-01-15".to_string(),
            external_id: None,
            notes: None,
        })
        .unwrap();
    h.ledger
        .record_buy(NewBuy {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(50),
            price: dec!(160),
            commission: Decimal::ZERO,
            transaction_date: "2024-02-01".to_string(),
            external_id: None,
            notes: None,
        })
        .unwrap();
    h.ledger
        .record_sell(NewSell {
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(120),
            price: dec!(170),
            commission: Decimal::ZERO,
            transaction_date: "2024-03-01".to_string(),
            basis_method: CostBasisMethod::Fifo,
            specific_lots: None,
            external_id: None,
            notes: None,
        })
        .unwrap();
}

#[test]
fn daily_valuation_after_fifo_sell() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-15", dec!(175));

    let calc = calculator(&h, AppConfig::default());
    let row = calc
        .compute_daily("u1", "AAPL", date("2024-03-15"))
        .unwrap()
        .expect("open position should be valued");

    assert_eq!(row.quantity, dec!(30));
    assert_eq!(row.weighted_avg_cost, dec!(160));
    assert_eq!(row.market_price, dec!(175));
    assert_eq!(row.market_value, dec!(5250));
    assert_eq!(row.unrealized_pnl, dec!(450));
    assert_eq!(row.realized_pnl_day, dec!(0));
    assert_eq!(row.total_cost, dec!(4800));
    assert_eq!(row.price_date, Some(date("2024-03-15")));
    assert!(!row.is_stale_price);
}

#[test]
fn sell_day_valuation_carries_realized_pnl() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-01", dec!(170));

    let calc = calculator(&h, AppConfig::default());
    let row = calc
        .compute_daily("u1", "AAPL", date("2024-03-01"))
        .unwrap()
        .unwrap();

    assert_eq!(row.quantity, dec!(30));
    assert_eq!(row.realized_pnl_day, dec!(2200));
    assert_eq!(row.unrealized_pnl, dec!(300));
}

#[test]
fn valuation_before_sell_replays_full_position() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-02-15", dec!(165));

    let calc = calculator(&h, AppConfig::default());
    let row = calc
        .compute_daily("u1", "AAPL", date("2024-02-15"))
        .unwrap()
        .unwrap();

    // Both lots were still whole on 2024-02-15.
    assert_eq!(row.quantity, dec!(150));
    assert_eq!(row.total_cost, dec!(23000));
    assert_eq!(row.realized_pnl_day, dec!(0));
}

#[test]
fn missing_price_backfills_and_flags_stale() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-15", dec!(175));

    let calc = calculator(&h, AppConfig::default());
    let row = calc
        .compute_daily("u1", "AAPL", date("2024-03-16"))
        .unwrap()
        .unwrap();

    assert!(row.is_stale_price);
    assert_eq!(row.price_date, Some(date("2024-03-15")));
    assert_eq!(row.market_price, dec!(175));
    assert_eq!(row.valuation_date, date("2024-03-16"));
}

#[test]
fn strict_strategy_fails_on_missing_price() {
    let h = harness();
    seed_s1_position(&h);

    let config = AppConfig {
        missing_price_strategy: MissingPriceStrategy::Strict,
        ..AppConfig::default()
    };
    let calc = calculator(&h, config);
    let error = calc
        .compute_daily("u1", "AAPL", date("2024-03-16"))
        .unwrap_err();
    assert!(matches!(error, PnlError::NoPrice { .. }));

    // Nothing was written for the failed date.
    let rows = calc
        .get_daily_pnl("u1", Some("AAPL"), None, None)
        .unwrap();
    assert!(!rows.iter().any(|r| r.valuation_date == date("2024-03-16")));
}

#[test]
fn recompute_is_reproducible_and_upserts_in_place() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-15", dec!(175));

    let calc = calculator(&h, AppConfig::default());
    let first = calc
        .compute_daily("u1", "AAPL", date("2024-03-15"))
        .unwrap()
        .unwrap();
    let second = calc
        .compute_daily("u1", "AAPL", date("2024-03-15"))
        .unwrap()
        .unwrap();

    assert_eq!(first.quantity, second.quantity);
    assert_eq!(first.market_value, second.market_value);
    assert_eq!(first.unrealized_pnl, second.unrealized_pnl);
    assert_eq!(first.realized_pnl_day, second.realized_pnl_day);
    assert_eq!(first.total_cost, second.total_cost);

    let rows = calc
        .get_daily_pnl("u1", Some("AAPL"), None, None)
        .unwrap();
    let for_date: Vec<_> = rows
        .iter()
        .filter(|r| r.valuation_date == date("2024-03-15"))
        .collect();
    assert_eq!(for_date.len(), 1);
}

#[test]
fn valuation_completes_the_sell_day_placeholder() {
    let h = harness();
    seed_s1_position(&h);

    // The sell folded its realized PnL into a stale placeholder row.
    let calc = calculator(&h, AppConfig::default());
    let placeholder = calc
        .get_daily_pnl("u1", Some("AAPL"), None, None)
        .unwrap()
        .into_iter()
        .find(|r| r.valuation_date == date("2024-03-01"))
        .expect("sell should have written a placeholder row");
    assert!(placeholder.is_stale_price);
    assert_eq!(placeholder.realized_pnl_day, dec!(2200));
    assert_eq!(placeholder.market_price, dec!(0));

    // Once a price exists the calculator completes the row.
    seed_price(&h, "2024-03-01", dec!(170));
    let completed = calc
        .compute_daily("u1", "AAPL", date("2024-03-01"))
        .unwrap()
        .unwrap();
    assert!(!completed.is_stale_price);
    assert_eq!(completed.realized_pnl_day, dec!(2200));
    assert_eq!(completed.market_price, dec!(170));
}

#[test]
fn batch_over_range_counts_partial_results() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-14", dec!(172));
    seed_price(&h, "2024-03-15", dec!(175));

    let calc = calculator(&h, AppConfig::default());
    let summary = calc
        .batch_compute("u1", date("2024-03-14"), date("2024-03-16"), false)
        .unwrap();

    // Three calendar days, one symbol; the 16th back-fills from the 15th.
    assert_eq!(summary.computed, 3);
    assert_eq!(summary.failed, 0);

    let rows = calc
        .get_daily_pnl("u1", Some("AAPL"), Some(date("2024-03-14")), Some(date("2024-03-16")))
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn batch_only_trading_days_uses_stored_price_dates() {
    let h = harness();
    seed_s1_position(&h);
    seed_price(&h, "2024-03-14", dec!(172));
    seed_price(&h, "2024-03-15", dec!(175));

    let calc = calculator(&h, AppConfig::default());
    let summary = calc
        .batch_compute("u1", date("2024-03-11"), date("2024-03-17"), true)
        .unwrap();

    // Only the two stored price dates are valued.
    assert_eq!(summary.computed, 2);
    assert_eq!(summary.skipped, 0);
}
