use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::DatabaseError;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Database error: {0}")]
    DatabaseConnectionError(#[from] DatabaseError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No open position for {owner_id}/{symbol}")]
    NoPosition { owner_id: String, symbol: String },

    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Lot {0} not found or not open")]
    LotUnavailable(String),

    #[error("Specific-lot plan sells {specified} but the transaction sells {requested}")]
    PlanQuantityMismatch {
        specified: Decimal,
        requested: Decimal,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}
