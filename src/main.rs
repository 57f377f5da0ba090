//! Swiper: exchange order-copying bot
//!
//! Watches a source account's closed orders and replays each new one,
//! scaled by a ratio, on one or more destination accounts.

mod api;
mod bot;
mod models;
mod trading;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{ClientSettings, Credentials, RetryPolicy, Venue};
use crate::bot::{Bot, BotConfig};
use crate::trading::{ExecutionStyle, ReplicationConfig, SELF_COPY_TAG};

/// Order-copying bot CLI.
#[derive(Parser)]
#[command(name = "swiper")]
#[command(about = "Copy closed orders from a source exchange account to destination accounts", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "SWIPER_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copy loop
    Run {
        #[command(flatten)]
        account: AccountArgs,

        #[command(flatten)]
        destinations: DestinationArgs,

        #[command(flatten)]
        replication: ReplicationArgs,
    },

    /// Show the resolved configuration (secrets omitted)
    Config {
        #[command(flatten)]
        account: AccountArgs,

        #[command(flatten)]
        destinations: DestinationArgs,

        #[command(flatten)]
        replication: ReplicationArgs,
    },

    /// Fetch and print the source account's recent closed orders
    Orders {
        #[command(flatten)]
        account: AccountArgs,
    },
}

/// Venue and source account.
#[derive(Args)]
struct AccountArgs {
    /// Trading venue
    #[arg(long, value_enum, env = "SWIPER_EXCHANGE", default_value_t = Venue::BinanceFutures)]
    exchange: Venue,

    /// Use the venue's testnet endpoints
    #[arg(long, env = "SWIPER_TESTNET")]
    testnet: bool,

    /// Symbols to watch (repeatable or comma-separated); optional on Kraken
    #[arg(long = "symbol", env = "SWIPER_SYMBOLS", value_delimiter = ',')]
    symbols: Vec<String>,

    /// Source account API key on Binance
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Source account API secret on Binance
    #[arg(long, env = "BINANCE_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Source account API key on Kraken
    #[arg(long, env = "KRAKEN_API_KEY", hide_env_values = true)]
    kraken_api_key: Option<String>,

    /// Source account API secret on Kraken (base64)
    #[arg(long, env = "KRAKEN_API_SECRET", hide_env_values = true)]
    kraken_api_secret: Option<String>,

    /// Attempts per closed-order fetch, first one included
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "10")]
    request_timeout_secs: u64,

    /// Most recent orders fetched per symbol
    #[arg(long, default_value = "20")]
    fetch_limit: u32,
}

/// Destination accounts.
#[derive(Args)]
struct DestinationArgs {
    /// Binance destination API keys, comma-separated
    #[arg(long, env = "BINANCE_API_COPYCAT_KEYS", value_delimiter = ',', hide_env_values = true)]
    copycat_keys: Vec<String>,

    /// Binance destination API secrets, comma-separated, paired with the keys by position
    #[arg(long, env = "BINANCE_API_COPYCAT_SECRETS", value_delimiter = ',', hide_env_values = true)]
    copycat_secrets: Vec<String>,

    /// Kraken destination API keys, comma-separated
    #[arg(long, env = "KRAKEN_API_COPYCAT_KEYS", value_delimiter = ',', hide_env_values = true)]
    kraken_copycat_keys: Vec<String>,

    /// Kraken destination API secrets, comma-separated, paired with the keys by position
    #[arg(long, env = "KRAKEN_API_COPYCAT_SECRETS", value_delimiter = ',', hide_env_values = true)]
    kraken_copycat_secrets: Vec<String>,

    /// Per-destination enable flags (true/false), paired by position
    #[arg(long, env = "SWIPER_DESTINATIONS_ENABLED", value_delimiter = ',')]
    destinations_enabled: Vec<bool>,
}

/// How orders are copied.
#[derive(Args)]
struct ReplicationArgs {
    /// Multiplier applied to source quantities
    #[arg(short, long, default_value = "1", env = "SWIPER_RATIO")]
    ratio: f64,

    /// Also place copies on the source account
    #[arg(long, env = "SWIPER_COPY_ON_SOURCE")]
    copy_on_source: bool,

    /// Polling interval in milliseconds
    #[arg(short, long, default_value = "2100", env = "SWIPER_INTERVAL_MS")]
    interval_ms: u64,

    /// Execution style of the copies
    #[arg(long, value_enum, default_value_t = ExecutionStyle::Market)]
    execution: ExecutionStyle,

    /// Truncate copied quantities to this many decimals
    #[arg(long)]
    quantity_decimals: Option<u32>,

    /// Never copy source orders whose client id starts with this prefix
    #[arg(long = "ignore-prefix", default_values_t = vec!["android_".to_string()])]
    ignore_prefixes: Vec<String>,

    /// Cycles a copied-order record is kept before it expires unobserved
    #[arg(long, default_value = "2")]
    ledger_retention_cycles: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            account,
            destinations,
            replication,
        } => {
            let settings = client_settings(&account)?;
            let replication_config = replication_config(&replication)?;

            let source = api::connect(account.exchange, source_credentials(&account)?, &settings)
                .context("Failed to set up source account")?;

            let mut clients = Vec::new();
            if replication.copy_on_source {
                clients.push(source.clone());
            }
            for (i, creds) in destination_credentials(account.exchange, &destinations)?
                .into_iter()
                .enumerate() {
                let client = api::connect(account.exchange, creds, &settings)
                    .with_context(|| format!("Failed to set up destination #{}", i + 1))?;
                clients.push(client);
            }
            if clients.is_empty() {
                bail!("No destination accounts enabled; set copycat keys or --copy-on-source");
            }

            info!(
                exchange = %account.exchange,
                testnet = account.testnet,
                symbols = ?settings.symbols,
                destinations = clients.len(),
                "Starting copy bot"
            );

            let config = BotConfig {
                poll_interval: Duration::from_millis(replication.interval_ms),
                fetch_timeout: fetch_budget(&settings),
                submit_timeout: settings.request_timeout,
                replication: replication_config,
            };

            let mut bot = Bot::new(config, source, clients)?;
            bot.run().await?;

            println!("\n{}", bot.stats());
        }

        Commands::Config {
            account,
            destinations,
            replication,
        } => {
            let settings = client_settings(&account)?;
            let config = replication_config(&replication)?;
            let dest_creds = destination_credentials(account.exchange, &destinations)?;

            println!("\n=== Exchange ===\n");
            println!("  Venue:                {}", account.exchange);
            println!("  Testnet:              {}", account.testnet);
            println!("  Symbols:              {}", symbols_display(&settings));
            println!("  Fetch Limit:          {}", settings.fetch_limit);
            println!("  Request Timeout:      {}s", settings.request_timeout.as_secs());
            println!("  Fetch Attempts:       {}", settings.retry.max_attempts);

            println!("\n=== Accounts ===\n");
            match source_credentials(&account) {
                Ok(creds) => println!("  Source:               {}...", creds.fingerprint()),
                Err(_) => println!("  Source:               (not set)"),
            }
            println!("  Copy On Source:       {}", replication.copy_on_source);
            println!("  Destinations:         {}", dest_creds.len());
            for creds in &dest_creds {
                println!("    - {}...", creds.fingerprint());
            }

            println!("\n=== Replication ===\n");
            println!("  Ratio:                {}", config.ratio);
            println!("  Execution:            {:?}", config.execution);
            match config.quantity_decimals {
                Some(dp) => println!("  Quantity Decimals:    {}", dp),
                None => println!("  Quantity Decimals:    exact"),
            }
            println!("  Ignored Prefixes:     {}", config.ignored_prefixes.join(", "));
            println!("  Ledger Retention:     {} cycles", config.ledger_retention_cycles);
            println!("  Client Id Tag:        {}", SELF_COPY_TAG);
            println!("  Poll Interval:        {}ms", replication.interval_ms);
        }

        Commands::Orders { account } => {
            let settings = client_settings(&account)?;
            let client = api::connect(account.exchange, source_credentials(&account)?, &settings)?;

            let snapshot = client
                .list_closed_orders()
                .await
                .context("Failed to fetch closed orders")?;

            if snapshot.is_empty() {
                println!("No closed orders for {}", symbols_display(&settings));
                return Ok(());
            }

            let mut orders: Vec<_> = snapshot.orders().collect();
            orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            println!(
                "\n{:<24} {:<12} {:<5} {:<8} {:>14} {:>14}",
                "ID", "SYMBOL", "SIDE", "TYPE", "QUANTITY", "PRICE"
            );
            println!("{}", "-".repeat(82));

            for order in orders {
                println!(
                    "{:<24} {:<12} {:<5} {:<8} {:>14} {:>14}",
                    truncate(&order.id, 24),
                    order.symbol,
                    order.side,
                    order.order_type,
                    order.quantity_display(),
                    order
                        .average_price
                        .or(order.price)
                        .map(|p| p.normalize().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }

    Ok(())
}

fn client_settings(account: &AccountArgs) -> Result<ClientSettings> {
    if account.max_attempts == 0 {
        bail!("--max-attempts must be at least 1");
    }
    if account.request_timeout_secs == 0 {
        bail!("--request-timeout-secs must be positive");
    }

    let symbols: Vec<String> = account
        .symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() && account.exchange.requires_symbols() {
        bail!(
            "At least one symbol is required on {} (--symbol or SWIPER_SYMBOLS)",
            account.exchange
        );
    }

    Ok(ClientSettings {
        testnet: account.testnet,
        request_timeout: Duration::from_secs(account.request_timeout_secs),
        retry: RetryPolicy::new(account.max_attempts),
        fetch_limit: account.fetch_limit.max(1),
        symbols,
    })
}

fn symbols_display(settings: &ClientSettings) -> String {
    if settings.symbols.is_empty() {
        "all".to_string()
    } else {
        settings.symbols.join(", ")
    }
}

fn source_credentials(account: &AccountArgs) -> Result<Credentials> {
    let (key, secret, key_env, secret_env) = match account.exchange {
        Venue::BinanceFutures | Venue::BinanceSpot => (
            &account.api_key,
            &account.api_secret,
            "BINANCE_API_KEY",
            "BINANCE_API_SECRET",
        ),
        Venue::Kraken => (
            &account.kraken_api_key,
            &account.kraken_api_secret,
            "KRAKEN_API_KEY",
            "KRAKEN_API_SECRET",
        ),
    };
    let key = key
        .as_deref()
        .with_context(|| format!("Source API key missing ({})", key_env))?;
    let secret = secret
        .as_deref()
        .with_context(|| format!("Source API secret missing ({})", secret_env))?;
    Credentials::new(key, secret).context("Invalid source credentials")
}

/// Enabled destination credentials for `venue`, in configuration order.
fn destination_credentials(venue: Venue, args: &DestinationArgs) -> Result<Vec<Credentials>> {
    let (keys, secrets) = match venue {
        Venue::BinanceFutures | Venue::BinanceSpot => (&args.copycat_keys, &args.copycat_secrets),
        Venue::Kraken => (&args.kraken_copycat_keys, &args.kraken_copycat_secrets),
    };
    if keys.len() != secrets.len() {
        bail!(
            "Got {} destination keys but {} secrets",
            keys.len(),
            secrets.len()
        );
    }
    if !args.destinations_enabled.is_empty() && args.destinations_enabled.len() != keys.len() {
        bail!(
            "Got {} destination enable flags for {} destinations",
            args.destinations_enabled.len(),
            keys.len()
        );
    }

    let mut enabled = Vec::new();
    for (i, (key, secret)) in keys.iter().zip(secrets).enumerate() {
        if !args.destinations_enabled.get(i).copied().unwrap_or(true) {
            continue;
        }
        let creds = Credentials::new(key.as_str(), secret.as_str())
            .with_context(|| format!("Invalid credentials for destination #{}", i + 1))?;
        enabled.push(creds);
    }
    Ok(enabled)
}

fn replication_config(args: &ReplicationArgs) -> Result<ReplicationConfig> {
    if args.interval_ms == 0 {
        bail!("--interval-ms must be positive");
    }
    let ratio = Decimal::try_from(args.ratio)
        .with_context(|| format!("Invalid ratio {}", args.ratio))?;

    let config = ReplicationConfig {
        ratio,
        execution: args.execution,
        quantity_decimals: args.quantity_decimals,
        ignored_prefixes: args.ignore_prefixes.clone(),
        ledger_retention_cycles: args.ledger_retention_cycles,
    };
    config.validate()?;
    Ok(config)
}

/// Worst-case duration of one fetch with all its retries.
fn fetch_budget(settings: &ClientSettings) -> Duration {
    settings.retry.worst_case(settings.request_timeout)
}

/// Shorten to at most `max_len` characters, ending in "..." when cut.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    match s.char_indices().nth(keep) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
