/// Decimal precision for stored monetary amounts
pub const DECIMAL_PRECISION: u32 = 6;

/// Decimal precision for per-share prices and cost bases
pub const PRICE_DECIMAL_PRECISION: u32 = 4;

/// Decimal precision for display
pub const DISPLAY_DECIMAL_PRECISION: u32 = 2;

/// Earliest date requested from the bulk provider when no override is set
pub const DEFAULT_HISTORY_START: &str = "2000-01-01";

/// Default gap (days) above which an incremental patch is abandoned for a
/// full bulk refresh
pub const DEFAULT_INCREMENTAL_THRESHOLD_DAYS: i64 = 100;

/// Default age (days) after which fundamentals are refreshed
pub const DEFAULT_FINANCIAL_REFRESH_DAYS: i64 = 90;

/// Default number of concurrent acquisition workers
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
