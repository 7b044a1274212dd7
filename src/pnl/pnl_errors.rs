use chrono::NaiveDate;
use thiserror::Error;

use crate::db::DatabaseError;

pub type Result<T> = std::result::Result<T, PnlError>;

#[derive(Error, Debug)]
pub enum PnlError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Database error: {0}")]
    DatabaseConnectionError(#[from] DatabaseError),

    #[error("No price available for {symbol} at {date}")]
    NoPrice { symbol: String, date: NaiveDate },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<crate::errors::Error> for PnlError {
    fn from(err: crate::errors::Error) -> Self {
        PnlError::Storage(err.to_string())
    }
}

impl From<crate::ledger::LedgerError> for PnlError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        PnlError::Storage(err.to_string())
    }
}
