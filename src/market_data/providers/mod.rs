pub mod backoff;
pub mod finnhub_provider;
pub mod models;
pub mod price_provider;
pub mod stooq_provider;

pub use finnhub_provider::FinnhubProvider;
pub use models::{CompanyProfile, DataSource, FundamentalsBundle, PriceRow, PriceSeries};
pub use price_provider::{FundamentalsProvider, PriceProvider};
pub use stooq_provider::StooqProvider;
