use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lotfolio::config::{AppConfig, PriceSource};
use lotfolio::db;
use lotfolio::financials::FinancialsRepository;
use lotfolio::ledger::{
    CostBasisMethod, LedgerRepository, LotLedgerService, NewBuy, NewSell, SpecificLotRequest,
};
use lotfolio::market_data::{
    MarketDataRepository, MarketDataRepositoryTrait, MarketDataService,
};
use lotfolio::pnl::{PnlCalculator, PnlRepository};

#[derive(Parser, Debug)]
#[command(name = "lotfolio", version, about = "Market data acquisition and lot-level trading ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Market data acquisition and queries
    #[command(subcommand)]
    Data(DataCommand),
    /// Trading ledger and PnL
    #[command(subcommand)]
    Trade(TradeCommand),
}

#[derive(Subcommand, Debug)]
enum DataCommand {
    /// Download price history (and optionally fundamentals) for symbols
    Download {
        #[arg(required = true)]
        symbols: Vec<String>,
        /// Also refresh fundamentals
        #[arg(long)]
        comprehensive: bool,
        /// Refresh fundamentals only, skip prices
        #[arg(long, conflicts_with = "comprehensive")]
        financial_only: bool,
        /// Override the default history start for first loads
        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,
    },
    /// Print stored price rows for a symbol
    Query {
        symbol: String,
        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum TradeCommand {
    /// Record a buy transaction
    Buy {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, value_parser = parse_decimal)]
        quantity: Decimal,
        #[arg(short, long, value_parser = parse_decimal)]
        price: Decimal,
        #[arg(short, long)]
        date: String,
        #[arg(long, default_value = "0", value_parser = parse_decimal)]
        commission: Decimal,
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record a sell transaction
    Sell {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, value_parser = parse_decimal)]
        quantity: Decimal,
        #[arg(short, long, value_parser = parse_decimal)]
        price: Decimal,
        #[arg(short, long)]
        date: String,
        #[arg(long, default_value = "0", value_parser = parse_decimal)]
        commission: Decimal,
        /// Cost-basis method: fifo, lifo, specific or average
        #[arg(long, default_value = "fifo", value_parser = parse_basis)]
        basis: CostBasisMethod,
        /// Specific-lot plan: lot=<id>:<qty>[,lot=<id>:<qty>...]
        #[arg(long, value_parser = parse_specific_lots)]
        specific_lots: Option<std::vec::Vec<SpecificLotRequest>>,
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List per-symbol position summaries
    Positions {
        #[arg(long)]
        owner: String,
    },
    /// List lots for a symbol
    Lots {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        symbol: String,
    },
    /// List sale allocations for a symbol
    Sales {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        symbol: String,
    },
    /// Compute and store daily PnL for one date
    CalculatePnl {
        #[arg(long)]
        owner: String,
        /// Limit to one symbol (default: every active symbol)
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        /// Price basis override: adj_close or close
        #[arg(long, value_parser = parse_price_source)]
        basis: Option<PriceSource>,
    },
    /// Compute and store daily PnL over a date range
    BatchCalculate {
        #[arg(long)]
        owner: String,
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
        #[arg(long)]
        only_trading_days: bool,
    },
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|e| format!("invalid decimal '{}': {}", raw, e))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD", raw))
}

fn parse_basis(raw: &str) -> Result<CostBasisMethod, String> {
    raw.parse()
}

fn parse_price_source(raw: &str) -> Result<PriceSource, String> {
    raw.parse()
}

/// Parses the specific-lot CLI syntax `lot=<id>:<qty>[,lot=<id>:<qty>...]`.
fn parse_specific_lots(raw: &str) -> Result<Vec<SpecificLotRequest>, String> {
    raw.split(',')
        .map(|entry| {
            let entry = entry.trim();
            let rest = entry
                .strip_prefix("lot=")
                .ok_or_else(|| format!("malformed specific-lot entry '{}'", entry))?;
            let (lot_id, quantity) = rest
                .split_once(':')
                .ok_or_else(|| format!("malformed specific-lot entry '{}'", entry))?;
            if lot_id.is_empty() {
                return Err(format!("malformed specific-lot entry '{}'", entry));
            }
            let quantity = Decimal::from_str(quantity)
                .map_err(|_| format!("invalid quantity in specific-lot entry '{}'", entry))?;
            if quantity <= Decimal::ZERO {
                return Err(format!(
                    "specific-lot quantity must be positive in '{}'",
                    entry
                ));
            }
            Ok(SpecificLotRequest {
                lot_id: lot_id.to_string(),
                quantity,
            })
        })
        .collect()
}

struct App {
    market_data: Arc<MarketDataService>,
    market_repo: Arc<dyn MarketDataRepositoryTrait>,
    ledger: Arc<LotLedgerService>,
    pnl: PnlCalculator,
}

impl App {
    fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = db::init(&config.db_path)?;
        let market_repo: Arc<dyn MarketDataRepositoryTrait> =
            Arc::new(MarketDataRepository::new(pool.clone()));
        let financials = Arc::new(FinancialsRepository::new(pool.clone()));
        let ledger_repo = Arc::new(LedgerRepository::new(pool.clone()));
        let pnl_repo = Arc::new(PnlRepository::new(pool));

        Ok(App {
            market_data: Arc::new(MarketDataService::with_default_providers(
                market_repo.clone(),
                financials,
                config.clone(),
            )),
            market_repo: market_repo.clone(),
            ledger: Arc::new(LotLedgerService::new(ledger_repo.clone())),
            pnl: PnlCalculator::new(market_repo, ledger_repo, pnl_repo, config),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    match run(cli, config, cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: Cli,
    config: AppConfig,
    cancel: CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = config;
    if let Command::Trade(TradeCommand::CalculatePnl {
        basis: Some(basis), ..
    }) = &cli.command
    {
        config.price_source = *basis;
    }
    let app = App::build(config)?;

    match cli.command {
        Command::Data(command) => run_data(command, &app, &cancel).await,
        Command::Trade(command) => run_trade(command, &app),
    }
}

async fn run_data(
    command: DataCommand,
    app: &App,
    cancel: &CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        DataCommand::Download {
            symbols,
            comprehensive,
            financial_only,
            start_date,
        } => {
            if financial_only {
                let mut all_ok = true;
                for symbol in &symbols {
                    let outcome = app.market_data.sync_financials(symbol, cancel).await;
                    match &outcome.error_message {
                        None => println!(
                            "{}: fundamentals {} ({} facts)",
                            outcome.symbol,
                            if outcome.refreshed { "refreshed" } else { "fresh, skipped" },
                            outcome.facts_written
                        ),
                        Some(message) => {
                            all_ok = false;
                            println!("{}: FAILED - {}", outcome.symbol, message);
                        }
                    }
                }
                return Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
            }

            let summary = app
                .market_data
                .batch(&symbols, comprehensive, start_date, cancel)
                .await;
            for entry in &summary.entries {
                let prices = &entry.prices;
                if prices.success {
                    println!(
                        "{}: {} rows via {} ({} - {})",
                        entry.symbol,
                        prices.rows_added,
                        prices
                            .strategy_used
                            .map(|s| s.as_str())
                            .unwrap_or("none"),
                        prices
                            .first_date
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        prices
                            .last_date
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                } else {
                    println!(
                        "{}: FAILED ({}) - {}",
                        entry.symbol,
                        prices
                            .error_category
                            .map(|c| c.as_str())
                            .unwrap_or("unknown"),
                        prices.error_message.as_deref().unwrap_or("")
                    );
                }
                if let Some(financials) = &entry.financials {
                    if let Some(message) = &financials.error_message {
                        println!("{}: fundamentals FAILED - {}", entry.symbol, message);
                    }
                }
            }
            println!("{}/{} symbols succeeded", summary.succeeded, summary.total);
            Ok(if summary.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        DataCommand::Query {
            symbol,
            start_date,
            end_date,
            limit,
        } => {
            let symbol = symbol.to_ascii_uppercase();
            let bars = app
                .market_repo
                .get_price_bars(&symbol, start_date, end_date, limit)?;
            if bars.is_empty() {
                eprintln!("no stored prices for {}", symbol);
                return Ok(ExitCode::FAILURE);
            }
            println!("date        open      high      low       close     adj_close volume");
            for bar in &bars {
                println!(
                    "{}  {:<8}  {:<8}  {:<8}  {:<8}  {:<8}  {}",
                    bar.date,
                    bar.open.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                    bar.high.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                    bar.low.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                    bar.close,
                    bar.adj_close,
                    bar.volume
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_trade(command: TradeCommand, app: &App) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        TradeCommand::Buy {
            owner,
            symbol,
            quantity,
            price,
            date,
            commission,
            external_id,
            notes,
        } => {
            let outcome = app.ledger.record_buy(NewBuy {
                owner_id: owner,
                symbol,
                quantity,
                price,
                commission,
                transaction_date: date,
                external_id,
                notes,
            })?;
            if outcome.duplicate {
                println!(
                    "buy already recorded as {} (external id match)",
                    outcome.transaction.id
                );
            } else {
                println!(
                    "recorded buy {}: lot {} ({} @ {})",
                    outcome.transaction.id,
                    outcome.lot.id,
                    outcome.lot.original_quantity,
                    outcome.lot.cost_basis_per_share
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        TradeCommand::Sell {
            owner,
            symbol,
            quantity,
            price,
            date,
            commission,
            basis,
            specific_lots,
            external_id,
            notes,
        } => {
            let outcome = app.ledger.record_sell(NewSell {
                owner_id: owner,
                symbol,
                quantity,
                price,
                commission,
                transaction_date: date,
                basis_method: basis,
                specific_lots,
                external_id,
                notes,
            })?;
            if outcome.duplicate {
                println!(
                    "sell already recorded as {} (external id match)",
                    outcome.transaction.id
                );
            } else {
                println!(
                    "recorded sell {}: {} allocations, realized pnl {}",
                    outcome.transaction.id,
                    outcome.allocations.len(),
                    outcome.total_realized_pnl
                );
                for allocation in &outcome.allocations {
                    println!(
                        "  lot {}: {} @ cost {} -> pnl {}",
                        allocation.lot_id,
                        allocation.quantity_sold,
                        allocation.cost_basis_per_share,
                        allocation.realized_pnl
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        TradeCommand::Positions { owner } => {
            let summaries = app.ledger.get_position_summaries(&owner)?;
            if summaries.is_empty() {
                println!("no open positions for {}", owner);
                return Ok(ExitCode::SUCCESS);
            }
            println!("symbol  quantity  avg_cost  total_cost  lots  first_buy");
            for summary in &summaries {
                println!(
                    "{:<6}  {:<8}  {:<8}  {:<10}  {:<4}  {}",
                    summary.symbol,
                    summary.total_quantity,
                    summary.avg_cost.round_dp(4),
                    summary.total_cost.round_dp(2),
                    summary.lot_count,
                    summary
                        .first_buy_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        TradeCommand::Lots { owner, symbol } => {
            let lots = app.ledger.get_lots(&owner, Some(&symbol.to_ascii_uppercase()))?;
            if lots.is_empty() {
                println!("no lots for {}/{}", owner, symbol);
                return Ok(ExitCode::SUCCESS);
            }
            println!("lot_id                                purchase    original  remaining  cost_basis  closed");
            for lot in &lots {
                println!(
                    "{}  {}  {:<8}  {:<9}  {:<10}  {}",
                    lot.id,
                    lot.purchase_date,
                    lot.original_quantity,
                    lot.remaining_quantity,
                    lot.cost_basis_per_share.round_dp(4),
                    lot.is_closed
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        TradeCommand::Sales { owner, symbol } => {
            let allocations = app.ledger.get_allocations(&owner, &symbol)?;
            if allocations.is_empty() {
                println!("no sales for {}/{}", owner, symbol);
                return Ok(ExitCode::SUCCESS);
            }
            println!("sell_transaction                      lot                                   quantity  cost    sale    pnl");
            for allocation in &allocations {
                println!(
                    "{}  {}  {:<8}  {:<6}  {:<6}  {}",
                    allocation.sell_transaction_id,
                    allocation.lot_id,
                    allocation.quantity_sold,
                    allocation.cost_basis_per_share.round_dp(4),
                    allocation.sale_price_per_share.round_dp(4),
                    allocation.realized_pnl.round_dp(2)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        TradeCommand::CalculatePnl {
            owner,
            symbol,
            date,
            basis: _,
        } => {
            let symbols = match symbol {
                Some(symbol) => vec![symbol.to_ascii_uppercase()],
                None => app.ledger.get_position_summaries(&owner)?
                    .into_iter()
                    .map(|summary| summary.symbol)
                    .collect(),
            };
            if symbols.is_empty() {
                println!("no active positions for {}", owner);
                return Ok(ExitCode::SUCCESS);
            }
            let mut wrote_any = false;
            for symbol in &symbols {
                match app.pnl.compute_daily(&owner, symbol, date)? {
                    Some(row) => {
                        wrote_any = true;
                        println!(
                            "{} {}: qty {} avg {} price {} value {} unrealized {} realized {}{}",
                            row.symbol,
                            row.valuation_date,
                            row.quantity,
                            row.weighted_avg_cost.round_dp(4),
                            row.market_price,
                            row.market_value.round_dp(2),
                            row.unrealized_pnl.round_dp(2),
                            row.realized_pnl_day.round_dp(2),
                            if row.is_stale_price { " (stale price)" } else { "" }
                        );
                    }
                    None => println!("{} {}: no position to value", symbol, date),
                }
            }
            Ok(if wrote_any { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        TradeCommand::BatchCalculate {
            owner,
            start,
            end,
            only_trading_days,
        } => {
            let summary = app.pnl.batch_compute(&owner, start, end, only_trading_days)?;
            println!(
                "{} rows computed, {} skipped, {} failed",
                summary.computed, summary.skipped, summary.failed
            );
            for (date, symbol, message) in summary.failures.iter().take(10) {
                println!("  {} {}: {}", date, symbol, message);
            }
            Ok(if summary.failed == 0 {
                ExitCode::SUCCESS
            } else if summary.computed > 0 {
                // Partial success
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn specific_lot_syntax_parses_pairs() {
        let plan = parse_specific_lots("lot=abc:40,lot=def:20.5").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].lot_id, "abc");
        assert_eq!(plan[0].quantity, dec!(40));
        assert_eq!(plan[1].quantity, dec!(20.5));
    }

    #[test]
    fn specific_lot_syntax_rejects_malformed_entries() {
        assert!(parse_specific_lots("abc:40").is_err());
        assert!(parse_specific_lots("lot=abc").is_err());
        assert!(parse_specific_lots("lot=:40").is_err());
        assert!(parse_specific_lots("lot=abc:xyz").is_err());
        assert!(parse_specific_lots("lot=abc:-5").is_err());
        assert!(parse_specific_lots("lot=abc:0").is_err());
    }
}
