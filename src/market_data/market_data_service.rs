use chrono::{Local, NaiveDate};
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::acquisition::{fundamentals_due, plan_price_fetch, FetchStrategy};
use super::market_data_errors::{MarketDataError, RetryClass};
use super::market_data_model::{
    BatchSyncEntry, BatchSyncSummary, FinancialSyncOutcome, PriceBar, StockMeta,
    SymbolSyncOutcome, SyncErrorCategory,
};
use super::market_data_traits::MarketDataRepositoryTrait;
use super::providers::{
    FinnhubProvider, FundamentalsProvider, PriceProvider, PriceSeries, StooqProvider,
};
use crate::config::AppConfig;
use crate::financials::{FinancialsRepository, StatementType};

/// Orchestrates policy, providers and storage for one or many symbols.
/// Per-symbol failures are folded into outcomes; a batch never aborts because
/// one symbol failed.
pub struct MarketDataService {
    repository: Arc<dyn MarketDataRepositoryTrait>,
    financials: Arc<FinancialsRepository>,
    bulk_provider: Arc<dyn PriceProvider>,
    api_provider: Arc<dyn PriceProvider>,
    fundamentals_provider: Arc<dyn FundamentalsProvider>,
    config: AppConfig,
}

impl MarketDataService {
    pub fn new(
        repository: Arc<dyn MarketDataRepositoryTrait>,
        financials: Arc<FinancialsRepository>,
        bulk_provider: Arc<dyn PriceProvider>,
        api_provider: Arc<dyn PriceProvider>,
        fundamentals_provider: Arc<dyn FundamentalsProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            repository,
            financials,
            bulk_provider,
            api_provider,
            fundamentals_provider,
            config,
        }
    }

    /// Wires the production providers: Stooq for bulk history, Finnhub for
    /// incremental candles and fundamentals.
    pub fn with_default_providers(
        repository: Arc<dyn MarketDataRepositoryTrait>,
        financials: Arc<FinancialsRepository>,
        config: AppConfig,
    ) -> Self {
        let finnhub = Arc::new(FinnhubProvider::new(&config));
        Self::new(
            repository,
            financials,
            Arc::new(StooqProvider::new(&config)),
            finnhub.clone(),
            finnhub,
            config,
        )
    }

    /// Fetches and persists the price series for one symbol according to the
    /// hybrid policy. Never returns Err; every failure mode is categorized in
    /// the outcome.
    pub async fn sync_symbol(
        &self,
        symbol: &str,
        start_override: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> SymbolSyncOutcome {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return SymbolSyncOutcome::failure(
                &symbol,
                None,
                SyncErrorCategory::Validation,
                "symbol must not be empty",
            );
        }
        if cancel.is_cancelled() {
            return SymbolSyncOutcome::failure(
                &symbol,
                None,
                SyncErrorCategory::Canceled,
                "sync canceled",
            );
        }

        if let Err(e) = self.repository.ensure_stock(&symbol) {
            return SymbolSyncOutcome::failure(
                &symbol,
                None,
                SyncErrorCategory::StorageError,
                e.to_string(),
            );
        }

        let last_stored = match self.repository.get_latest_price_date(&symbol) {
            Ok(last) => last,
            Err(e) => {
                return SymbolSyncOutcome::failure(
                    &symbol,
                    None,
                    SyncErrorCategory::StorageError,
                    e.to_string(),
                )
            }
        };

        let today = Local::now().date_naive();
        let history_start = start_override.unwrap_or(self.config.history_start);
        let plan = plan_price_fetch(
            last_stored,
            today,
            history_start,
            self.config.incremental_threshold_days,
        );
        debug!(
            "{}: plan {} from {} to {}",
            symbol,
            plan.strategy.as_str(),
            plan.from,
            plan.to
        );

        let (series, strategy) = match plan.strategy {
            FetchStrategy::ApiIncremental => {
                match self
                    .api_provider
                    .download_prices(&symbol, plan.from, plan.to, cancel)
                    .await
                {
                    Ok(series) => (series, FetchStrategy::ApiIncremental),
                    Err(MarketDataError::Canceled) => {
                        return SymbolSyncOutcome::failure(
                            &symbol,
                            Some(FetchStrategy::ApiIncremental),
                            SyncErrorCategory::Canceled,
                            "sync canceled",
                        )
                    }
                    Err(e) if matches!(e.retry_class(), RetryClass::Retryable | RetryClass::NoData) => {
                        warn!(
                            "{}: API source unavailable ({}), falling back to bulk refresh",
                            symbol, e
                        );
                        match self
                            .bulk_provider
                            .download_prices(&symbol, history_start, today, cancel)
                            .await
                        {
                            Ok(series) => (series, FetchStrategy::BulkFull),
                            Err(fallback_error) => {
                                return self.provider_failure(
                                    &symbol,
                                    FetchStrategy::BulkFull,
                                    fallback_error,
                                )
                            }
                        }
                    }
                    Err(e) => {
                        return self.provider_failure(&symbol, FetchStrategy::ApiIncremental, e)
                    }
                }
            }
            FetchStrategy::BulkFull => {
                match self
                    .bulk_provider
                    .download_prices(&symbol, plan.from, plan.to, cancel)
                    .await
                {
                    Ok(series) => (series, FetchStrategy::BulkFull),
                    Err(e) => return self.provider_failure(&symbol, FetchStrategy::BulkFull, e),
                }
            }
        };

        self.persist_series(&symbol, series, strategy, last_stored)
    }

    fn provider_failure(
        &self,
        symbol: &str,
        strategy: FetchStrategy,
        error: MarketDataError,
    ) -> SymbolSyncOutcome {
        let category = match &error {
            MarketDataError::Canceled => SyncErrorCategory::Canceled,
            MarketDataError::NoData => SyncErrorCategory::NoData,
            e if e.retry_class() == RetryClass::Retryable => {
                SyncErrorCategory::ProviderUnavailable
            }
            _ => SyncErrorCategory::ProviderError,
        };
        SymbolSyncOutcome::failure(symbol, Some(strategy), category, error.to_string())
    }

    fn persist_series(
        &self,
        symbol: &str,
        series: PriceSeries,
        strategy: FetchStrategy,
        last_stored: Option<NaiveDate>,
    ) -> SymbolSyncOutcome {
        let bars: Vec<PriceBar> = series
            .rows
            .iter()
            .map(|row| PriceBar {
                symbol: symbol.to_string(),
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                adj_close: row.adj_close,
                volume: row.volume,
            })
            .collect();

        // An incremental patch only writes dates past the stored head; a bulk
        // refresh re-upserts the whole overlap so corrections land too.
        let bars_to_save: Vec<PriceBar> = match (strategy, last_stored) {
            (FetchStrategy::ApiIncremental, Some(last)) => {
                bars.iter().filter(|b| b.date > last).cloned().collect()
            }
            _ => bars.clone(),
        };
        let rows_added = match last_stored {
            Some(last) => bars.iter().filter(|b| b.date > last).count(),
            None => bars.len(),
        };

        if !bars_to_save.is_empty() {
            if let Err(e) = self.repository.save_price_bars(&bars_to_save) {
                return SymbolSyncOutcome::failure(
                    symbol,
                    Some(strategy),
                    SyncErrorCategory::StorageError,
                    e.to_string(),
                );
            }
        }

        info!(
            "{}: {} added {} rows ({} fetched, {} dropped)",
            symbol,
            strategy.as_str(),
            rows_added,
            bars.len(),
            series.dropped_rows
        );

        SymbolSyncOutcome {
            symbol: symbol.to_string(),
            success: true,
            strategy_used: Some(strategy),
            rows_added,
            first_date: bars.first().map(|b| b.date),
            last_date: bars.last().map(|b| b.date),
            error_category: None,
            error_message: None,
        }
    }

    /// Refreshes fundamentals when the stored data is absent or older than
    /// the configured window. Also refreshes stock metadata from the profile.
    pub async fn sync_financials(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> FinancialSyncOutcome {
        let symbol = symbol.trim().to_ascii_uppercase();
        let failure = |message: String| FinancialSyncOutcome {
            symbol: symbol.clone(),
            success: false,
            refreshed: false,
            facts_written: 0,
            error_message: Some(message),
        };

        if cancel.is_cancelled() {
            return failure("sync canceled".to_string());
        }
        if let Err(e) = self.repository.ensure_stock(&symbol) {
            return failure(e.to_string());
        }

        let latest_period = match self.financials.get_latest_period_end(&symbol) {
            Ok(period) => period,
            Err(e) => return failure(e.to_string()),
        };
        let today = Local::now().date_naive();
        if !fundamentals_due(latest_period, today, self.config.financial_refresh_days) {
            debug!("{}: fundamentals fresh, skipping refresh", symbol);
            return FinancialSyncOutcome {
                symbol,
                success: true,
                refreshed: false,
                facts_written: 0,
                error_message: None,
            };
        }

        let bundle = match self
            .fundamentals_provider
            .download_fundamentals(&symbol, cancel)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => return failure(e.to_string()),
        };
        if bundle.statement_count() == 0 {
            return failure("no financial statements returned".to_string());
        }

        let mut facts_written = 0;
        for (statement, periods) in [
            (StatementType::IncomeStatement, &bundle.income_statement),
            (StatementType::BalanceSheet, &bundle.balance_sheet),
            (StatementType::CashFlow, &bundle.cash_flow),
        ] {
            if periods.is_empty() {
                continue;
            }
            match self.financials.upsert_statement(&symbol, statement, periods) {
                Ok(written) => facts_written += written,
                Err(e) => return failure(e.to_string()),
            }
        }

        let meta = StockMeta {
            company_name: bundle.profile.company_name.clone(),
            sector: bundle.profile.sector.clone(),
            industry: bundle.profile.industry.clone(),
            description: bundle.profile.description.clone(),
        };
        if meta != StockMeta::default() {
            if let Err(e) = self.repository.update_stock_meta(&symbol, &meta) {
                warn!("{}: metadata refresh failed: {}", symbol, e);
            }
        }

        info!("{}: fundamentals refreshed ({} facts)", symbol, facts_written);
        FinancialSyncOutcome {
            symbol,
            success: true,
            refreshed: true,
            facts_written,
            error_message: None,
        }
    }

    /// Runs per-symbol work items through a bounded worker pool. Results are
    /// collected as they complete; ordering is not guaranteed.
    pub async fn batch(
        &self,
        symbols: &[String],
        include_financials: bool,
        start_override: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> BatchSyncSummary {
        info!(
            "Batch acquisition of {} symbols (financials: {})",
            symbols.len(),
            include_financials
        );

        let entries: Vec<BatchSyncEntry> = futures::stream::iter(symbols.iter().map(|symbol| {
            async move {
                let prices = self.sync_symbol(symbol, start_override, cancel).await;
                let financials = if include_financials {
                    Some(self.sync_financials(symbol, cancel).await)
                } else {
                    None
                };
                let success = prices.success
                    && financials.as_ref().map(|f| f.success).unwrap_or(true);
                BatchSyncEntry {
                    symbol: prices.symbol.clone(),
                    success,
                    prices,
                    financials,
                }
            }
        }))
        .buffer_unordered(self.config.worker_pool_size)
        .collect()
        .await;

        let succeeded = entries.iter().filter(|e| e.success).count();
        let summary = BatchSyncSummary {
            total: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        };
        info!(
            "Batch acquisition complete: {}/{} succeeded",
            summary.succeeded, summary.total
        );
        summary
    }
}
