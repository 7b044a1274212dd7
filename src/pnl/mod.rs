pub mod pnl_errors;
pub mod pnl_model;
pub mod pnl_repository;
pub mod pnl_service;

pub use pnl_errors::{PnlError, Result};
pub use pnl_model::{BatchPnlSummary, DailyPnl};
pub use pnl_repository::PnlRepository;
pub use pnl_service::PnlCalculator;
