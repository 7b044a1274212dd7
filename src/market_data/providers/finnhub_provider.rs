use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::backoff::{retry_with_backoff, RetryPolicy};
use super::models::{CompanyProfile, DataSource, FundamentalsBundle, PriceRow, PriceSeries};
use super::price_provider::{FundamentalsProvider, PriceProvider};
use crate::config::AppConfig;
use crate::financials::StatementPeriod;
use crate::market_data::MarketDataError;

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER: &str = "FINNHUB";

/// Incremental price source and fundamentals source. Candle requests are
/// bounded to the requested window; fundamentals prefer the
/// `financials-reported` endpoint and fall back to the legacy `financials`
/// one when it returns nothing.
pub struct FinnhubProvider {
    client: Client,
    token: Option<String>,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "finnhubIndustry", default)]
    finnhub_industry: Option<String>,
    #[serde(default)]
    weburl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportedResponse {
    #[serde(default)]
    data: Vec<ReportedRow>,
}

#[derive(Debug, Deserialize)]
struct ReportedRow {
    #[serde(rename = "endDate", default)]
    end_date: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    report: Option<ReportSections>,
}

#[derive(Debug, Deserialize)]
struct ReportSections {
    #[serde(default)]
    ic: Vec<ReportEntry>,
    #[serde(default)]
    bs: Vec<ReportEntry>,
    #[serde(default)]
    cf: Vec<ReportEntry>,
}

#[derive(Debug, Deserialize)]
struct ReportEntry {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    concept: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyFinancialsResponse {
    #[serde(default)]
    financials: Vec<LegacyRow>,
}

#[derive(Debug, Deserialize)]
struct LegacyRow {
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    quarter: Option<i32>,
    #[serde(default)]
    data: Vec<ReportEntry>,
}

impl FinnhubProvider {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        FinnhubProvider {
            client,
            token: config.finnhub_api_key.clone(),
            policy: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.base_delay,
                total_deadline: config.total_deadline,
            },
        }
    }

    fn token(&self) -> Result<&str, MarketDataError> {
        self.token
            .as_deref()
            .ok_or_else(|| MarketDataError::MissingCredential("FINNHUB_API_KEY".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, MarketDataError> {
        let token = self.token()?;
        let url = format!("{}/{}", BASE_URL, path);
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("token", token.to_string()));

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MarketDataError::UpstreamStatus {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MarketDataError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("unexpected payload shape: {}", e),
            })
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries, MarketDataError> {
        debug!(
            "Downloading {} candles from Finnhub ({} to {})",
            symbol, from, to
        );
        let from_ts = from.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let to_ts = to.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();

        let candles: CandleResponse = self
            .get_json(
                "stock/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", "D".to_string()),
                    ("from", from_ts.to_string()),
                    ("to", to_ts.to_string()),
                ],
            )
            .await?;

        match candles.s.as_str() {
            "ok" => {}
            "no_data" => return Err(MarketDataError::NoData),
            other => {
                return Err(MarketDataError::ProviderError {
                    provider: PROVIDER.to_string(),
                    message: format!("candle status '{}'", other),
                })
            }
        }
        if candles.t.is_empty() {
            return Err(MarketDataError::NoData);
        }

        let rows = Self::candles_to_rows(&candles);
        Ok(PriceSeries::validated(symbol, DataSource::Finnhub, rows))
    }

    fn candles_to_rows(candles: &CandleResponse) -> Vec<PriceRow> {
        let mut rows = Vec::with_capacity(candles.t.len());
        for (i, ts) in candles.t.iter().enumerate() {
            let date = match DateTime::from_timestamp(*ts, 0) {
                Some(dt) => dt.date_naive(),
                None => continue,
            };
            let close = match candles.c.get(i).and_then(|v| Decimal::from_f64_retain(*v)) {
                Some(c) => c,
                None => continue,
            };
            rows.push(PriceRow {
                date,
                open: candles.o.get(i).and_then(|v| Decimal::from_f64_retain(*v)),
                high: candles.h.get(i).and_then(|v| Decimal::from_f64_retain(*v)),
                low: candles.l.get(i).and_then(|v| Decimal::from_f64_retain(*v)),
                close,
                adj_close: close,
                volume: candles.v.get(i).map(|v| *v as i64).unwrap_or(0),
            });
        }
        rows
    }

    async fn fetch_fundamentals(
        &self,
        symbol: &str,
    ) -> Result<FundamentalsBundle, MarketDataError> {
        debug!("Downloading {} fundamentals from Finnhub", symbol);

        let profile = match self
            .get_json::<ProfileResponse>("stock/profile2", &[("symbol", symbol.to_string())])
            .await
        {
            Ok(p) => CompanyProfile {
                company_name: p.name,
                sector: p.finnhub_industry.clone(),
                industry: p.finnhub_industry,
                description: p.weburl,
            },
            Err(e) => {
                warn!("{}: profile fetch failed, continuing: {}", symbol, e);
                CompanyProfile::default()
            }
        };

        let mut income_statement = Vec::new();
        let mut balance_sheet = Vec::new();
        let mut cash_flow = Vec::new();

        match self
            .get_json::<ReportedResponse>(
                "stock/financials-reported",
                &[("symbol", symbol.to_string())],
            )
            .await
        {
            Ok(reported) if !reported.data.is_empty() => {
                for row in &reported.data {
                    let Some(period_end) = Self::reported_period_end(row) else {
                        continue;
                    };
                    if let Some(sections) = &row.report {
                        Self::push_period(&mut income_statement, period_end, &sections.ic);
                        Self::push_period(&mut balance_sheet, period_end, &sections.bs);
                        Self::push_period(&mut cash_flow, period_end, &sections.cf);
                    }
                }
            }
            Ok(_) => debug!("{}: financials-reported returned no rows", symbol),
            Err(e) => warn!("{}: financials-reported failed: {}", symbol, e),
        }

        // Legacy fallback, one statement at a time.
        if income_statement.is_empty() && balance_sheet.is_empty() && cash_flow.is_empty() {
            for (statement_param, out) in [
                ("ic", &mut income_statement),
                ("bs", &mut balance_sheet),
                ("cf", &mut cash_flow),
            ] {
                match self
                    .get_json::<LegacyFinancialsResponse>(
                        "stock/financials",
                        &[
                            ("symbol", symbol.to_string()),
                            ("statement", statement_param.to_string()),
                            ("freq", "annual".to_string()),
                        ],
                    )
                    .await
                {
                    Ok(legacy) => {
                        for row in &legacy.financials {
                            let Some(period_end) = Self::legacy_period_end(row) else {
                                continue;
                            };
                            Self::push_period(out, period_end, &row.data);
                        }
                    }
                    Err(e) => warn!(
                        "{}: legacy financials ({}) failed: {}",
                        symbol, statement_param, e
                    ),
                }
            }
        }

        for periods in [&mut income_statement, &mut balance_sheet, &mut cash_flow] {
            periods.sort_by(|a, b| b.period_end.cmp(&a.period_end));
        }

        Ok(FundamentalsBundle {
            symbol: symbol.to_string(),
            profile,
            income_statement,
            balance_sheet,
            cash_flow,
        })
    }

    fn push_period(out: &mut Vec<StatementPeriod>, period_end: NaiveDate, entries: &[ReportEntry]) {
        if entries.is_empty() {
            return;
        }
        let items: Vec<(String, Option<Decimal>)> = entries
            .iter()
            .filter_map(|entry| {
                let name = entry.label.clone().or_else(|| entry.concept.clone())?;
                Some((name, entry.value.as_ref().and_then(Self::coerce_value)))
            })
            .collect();
        if !items.is_empty() {
            out.push(StatementPeriod { period_end, items });
        }
    }

    fn coerce_value(value: &serde_json::Value) -> Option<Decimal> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
            serde_json::Value::String(s) if !s.is_empty() => s.parse().ok(),
            _ => None,
        }
    }

    fn reported_period_end(row: &ReportedRow) -> Option<NaiveDate> {
        if let Some(raw) = row.end_date.as_deref() {
            let prefix = raw.get(..10).unwrap_or(raw);
            if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(date);
            }
        }
        row.year
            .and_then(|year| NaiveDate::from_ymd_opt(year, 12, 31))
    }

    fn legacy_period_end(row: &LegacyRow) -> Option<NaiveDate> {
        let year = row.year?;
        match row.quarter {
            // Approximate quarter ends; the legacy endpoint has no exact date.
            Some(q @ 1..=4) => NaiveDate::from_ymd_opt(year, (3 * q) as u32, 28),
            _ => NaiveDate::from_ymd_opt(year, 12, 31),
        }
    }
}

#[async_trait]
impl PriceProvider for FinnhubProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn download_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<PriceSeries, MarketDataError> {
        retry_with_backoff(self.policy, PROVIDER, cancel, || {
            self.fetch_candles(symbol, from, to)
        })
        .await
    }
}

#[async_trait]
impl FundamentalsProvider for FinnhubProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn download_fundamentals(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<FundamentalsBundle, MarketDataError> {
        retry_with_backoff(self.policy, PROVIDER, cancel, || {
            self.fetch_fundamentals(symbol)
        })
        .await
    }
}
