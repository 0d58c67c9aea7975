use anyhow::Context;
use clap::{Parser, Subcommand};
use futuresbot::api::{Credentials, ExchangeApi, ExchangeClient};
use futuresbot::bot::{BotController, ManualOrder, OperatorApi, StartRequest};
use futuresbot::config::Settings;
use futuresbot::execution::BinanceKlineConnector;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "futuresbot",
    version,
    about = "Automated strategy trading on Binance USDⓈ-M futures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot until Ctrl+C
    Run(RunArgs),
    /// Show the last price of a symbol
    Price { symbol: String },
    /// Show 24h statistics of a symbol
    Stats { symbol: String },
    /// Show non-zero futures wallet balances
    Balance,
    /// Show open futures positions
    Positions,
    /// Place a one-off order
    Order(OrderArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// dropbox, hybrid or manual
    #[arg(long, default_value = "hybrid")]
    mode: String,

    /// ma_crossover, rsi_bounce, bollinger or macd
    #[arg(long, default_value = "ma_crossover")]
    strategy: String,

    /// Comma-separated trading pairs
    #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
    symbols: Vec<String>,

    #[arg(long, default_value_t = 10)]
    leverage: i64,

    /// Share of equity committed per trade, in percent
    #[arg(long, default_value_t = 1.0)]
    risk_percent: f64,
}

#[derive(Parser)]
struct OrderArgs {
    #[arg(long)]
    symbol: String,

    /// buy or sell
    #[arg(long)]
    side: String,

    #[arg(long)]
    quantity: Decimal,

    /// Limit price; omit for a market order
    #[arg(long)]
    price: Option<Decimal>,

    /// Stop trigger price; makes it a STOP_MARKET order
    #[arg(long)]
    stop_price: Option<Decimal>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let settings = Settings::load().context("Failed to load settings")?;
    tracing::debug!(?settings, "Settings loaded");

    let credentials = credentials_for(&cli.command, &settings)?;
    let exchange = Arc::new(ExchangeClient::new(&settings, credentials)?);

    match cli.command {
        Commands::Run(args) => run(settings, exchange, args).await?,
        Commands::Price { symbol } => {
            let price = exchange.get_price(&symbol.to_uppercase()).await?;
            print_json(&serde_json::json!({ "symbol": symbol.to_uppercase(), "price": price }))?;
        }
        Commands::Stats { symbol } => {
            print_json(&exchange.get_24h_stats(&symbol.to_uppercase()).await?)?;
        }
        Commands::Balance => print_json(&exchange.get_account_balance().await?)?,
        Commands::Positions => print_json(&exchange.get_account_positions().await?)?,
        Commands::Order(args) => {
            let order = ManualOrder {
                symbol: args.symbol,
                side: args.side,
                quantity: args.quantity,
                price: args.price,
                stop_price: args.stop_price,
            }
            .into_order_request()?;
            print_json(&exchange.place_order(&order).await?)?;
        }
    }

    Ok(())
}

async fn run(
    settings: Settings,
    exchange: Arc<ExchangeClient>,
    args: RunArgs,
) -> anyhow::Result<()> {
    tracing::info!("🚀 futuresbot starting");

    let exchange: Arc<dyn ExchangeApi> = exchange;
    let connector = Arc::new(BinanceKlineConnector::new(&settings));
    let controller = Arc::new(BotController::new(exchange.clone(), connector, &settings));
    let operator = OperatorApi::new(controller, exchange);

    let response = operator
        .start(StartRequest {
            mode: Some(args.mode),
            strategy: Some(args.strategy),
            symbols: Some(args.symbols),
            leverage: Some(args.leverage),
            risk_percent: Some(args.risk_percent),
        })
        .await?;
    print_json(&response)?;
    for warning in &response.warnings {
        tracing::warn!("⚠️  {}", warning);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");

    print_json(&operator.stop().await)?;
    print_json(&operator.status())?;
    Ok(())
}

impl Commands {
    /// Whether the command makes signed calls
    fn needs_credentials(&self) -> bool {
        !matches!(self, Commands::Price { .. } | Commands::Stats { .. })
    }
}

/// Credentials are required up front for commands that sign requests.
fn credentials_for(
    command: &Commands,
    settings: &Settings,
) -> anyhow::Result<Option<Credentials>> {
    if command.needs_credentials() {
        let credentials = settings
            .credentials()
            .context("Binance API credentials are required for this command")?;
        Ok(Some(credentials))
    } else {
        Ok(settings.credentials().ok())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("futuresbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use futuresbot::BotError;

    fn command(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("futuresbot").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_run_without_credentials_fails_up_front() {
        let err = credentials_for(&command(&["run"]), &Settings::default()).unwrap_err();

        let cause = err.downcast_ref::<BotError>().unwrap();
        assert!(matches!(cause, BotError::Config(_)));
    }

    #[test]
    fn test_signed_commands_need_credentials() {
        let settings = Settings::default();
        let signed: [&[&str]; 3] = [
            &["balance"],
            &["positions"],
            &["order", "--symbol", "BTCUSDT", "--side", "buy", "--quantity", "0.01"],
        ];
        for args in signed {
            assert!(credentials_for(&command(args), &settings).is_err(), "{:?}", args);
        }
    }

    #[test]
    fn test_market_data_commands_run_without_credentials() {
        let settings = Settings::default();
        assert!(credentials_for(&command(&["price", "BTCUSDT"]), &settings).unwrap().is_none());
        assert!(credentials_for(&command(&["stats", "ETHUSDT"]), &settings).unwrap().is_none());
    }

    #[test]
    fn test_run_args_defaults() {
        let Commands::Run(args) = command(&["run", "--symbols", "btcusdt,solusdt"]) else {
            panic!("expected run");
        };
        assert_eq!(args.symbols, vec!["btcusdt", "solusdt"]);
        assert_eq!(args.mode, "hybrid");
        assert_eq!(args.leverage, 10);
    }
}
