pub mod financials_model;
pub mod financials_repository;

pub use financials_model::{FinancialFact, StatementPeriod, StatementType};
pub use financials_repository::FinancialsRepository;
