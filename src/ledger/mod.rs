pub mod ledger_errors;
pub mod ledger_model;
pub mod ledger_repository;
pub mod ledger_service;
pub mod matchers;

pub use ledger_errors::{LedgerError, Result};
pub use ledger_model::{
    BuyOutcome, NewBuy, NewSell, PositionLot, PositionSummary, SaleAllocation, SellOutcome,
    Transaction, TransactionKind,
};
pub use ledger_repository::LedgerRepository;
pub use ledger_service::LotLedgerService;
pub use matchers::{plan_allocations, CostBasisMethod, LotAllocation, SpecificLotRequest};
