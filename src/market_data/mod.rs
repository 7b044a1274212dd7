pub mod acquisition;
pub mod market_data_errors;
pub mod market_data_model;
pub mod market_data_repository;
pub mod market_data_service;
pub mod market_data_traits;
pub mod providers;

pub use acquisition::{fundamentals_due, plan_price_fetch, FetchPlan, FetchStrategy};
pub use market_data_errors::{MarketDataError, RetryClass};
pub use market_data_model::{
    BatchSyncEntry, BatchSyncSummary, FinancialSyncOutcome, PriceBar, StockMeta,
    SymbolSyncOutcome, SyncErrorCategory,
};
pub use market_data_repository::MarketDataRepository;
pub use market_data_service::MarketDataService;
pub use market_data_traits::MarketDataRepositoryTrait;
