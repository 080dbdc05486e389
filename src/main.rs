//! Equity sim - main entry point
//!
//! This binary provides two subcommands:
//! - serve: run the execution engine (admission + matching + retry + opener)
//! - admin: one-shot ledger/order inspection, standing in for the REST
//!   surface named in spec §6 (HTTP itself is out of scope)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use equity_sim_core::config::EngineConfig;
use equity_sim_core::engine::Engine;
use equity_sim_core::orders::OrderStatus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "equity-sim")]
#[command(about = "Simulated equity-trading execution core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the execution engine until Ctrl+C
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,
    },

    /// Submit a buy order
    Buy {
        #[arg(short, long, default_value = "config.json")]
        config: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        price: Option<i64>,
    },

    /// Submit a sell order
    Sell {
        #[arg(short, long, default_value = "config.json")]
        config: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        price: Option<i64>,
    },

    /// Inspect ledger/order state for one user
    Admin {
        #[arg(short, long, default_value = "config.json")]
        config: String,
        #[arg(long)]
        user_id: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("logging initialized");
    Ok(())
}

fn load_config(path: &str) -> Result<EngineConfig> {
    if PathBuf::from(path).exists() {
        let config = EngineConfig::from_file(path).context("failed to load config file")?;
        config.validate()?;
        Ok(config)
    } else {
        let config = EngineConfig::default();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Serve { .. } => "serve",
        Commands::Buy { .. } => "buy",
        Commands::Sell { .. } => "sell",
        Commands::Admin { .. } => "admin",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(&config)?;
            let engine = Arc::new(Engine::new(config)?);
            engine.run().await?;
        }
        Commands::Buy {
            config,
            user_id,
            ticker,
            quantity,
            price,
        } => {
            let config = load_config(&config)?;
            let engine = Engine::new(config)?;
            let order = engine.admission.submit_buy(&user_id, &ticker, quantity, price)?;
            println!(
                "order {} {} {} x{} @ {} -> {}",
                order.order_id,
                order.side.as_str(),
                order.ticker,
                order.quantity,
                order.price,
                order.status.as_str()
            );
        }
        Commands::Sell {
            config,
            user_id,
            ticker,
            quantity,
            price,
        } => {
            let config = load_config(&config)?;
            let engine = Engine::new(config)?;
            let order = engine.admission.submit_sell(&user_id, &ticker, quantity, price)?;
            println!(
                "order {} {} {} x{} @ {} -> {}",
                order.order_id,
                order.side.as_str(),
                order.ticker,
                order.quantity,
                order.price,
                order.status.as_str()
            );
        }
        Commands::Admin { config, user_id } => {
            let config = load_config(&config)?;
            let engine = Engine::new(config)?;
            match engine.ledger.get_account_by_user(&user_id)? {
                Some(account) => {
                    println!("account {} balance {}", account.account_id, account.cash_balance);
                    for status in [OrderStatus::Pending, OrderStatus::Reserved, OrderStatus::Executed, OrderStatus::Failed, OrderStatus::Cancelled] {
                        let orders = engine.orders.list_by_account_status(&account.account_id, status)?;
                        if !orders.is_empty() {
                            println!("{}: {} order(s)", status.as_str(), orders.len());
                        }
                    }
                }
                None => println!("no account for user {user_id}"),
            }
        }
    }

    Ok(())
}
