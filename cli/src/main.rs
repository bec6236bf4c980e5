//! PriceDesk CLI
//!
//! Converts amounts between currencies and reports exchange-rate freshness.

use std::time::Duration;

use clap::{Parser, Subcommand};
use pricedesk_common::Currency;
use pricedesk_fx::{FxConfig, PriceEngine};
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod report;

use commands::Output;

/// PriceDesk CLI
#[derive(Parser, Debug)]
#[command(name = "pricedesk")]
#[command(about = "Currency conversion with cached, fallback-aware exchange rates")]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an amount between two currencies
    Convert {
        amount: Decimal,
        from: String,
        to: String,
    },
    /// List supported currencies and their approximate rates
    Currencies,
    /// Show upstream rates for a base currency
    Rates {
        #[arg(default_value = "BRL")]
        base: String,
    },
    /// Show freshness and cache statistics
    Status,
    /// Drop every cache and reload rates
    Refresh,
    /// Warm the conversion cache
    Preload {
        /// Extra amounts on top of the configured common amounts
        amounts: Vec<Decimal>,
    },
    /// Keep the engine running and print freshness changes
    Watch {
        /// Stop after this many seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    // Load configuration
    let config = FxConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let output = if args.json { Output::Json } else { Output::Text };
    let engine = PriceEngine::with_upstream(config)?;

    if !matches!(args.command, Command::Currencies) {
        let freshness = engine.start().await;
        info!(freshness = %freshness, "Engine ready");
    }

    match args.command {
        Command::Convert { amount, from, to } => {
            commands::convert(&engine, output, amount, &Currency::new(from), &Currency::new(to))
                .await?
        }
        Command::Currencies => commands::currencies(&engine, output)?,
        Command::Rates { base } => commands::rates(&engine, output, &Currency::new(base)).await?,
        Command::Status => commands::status(&engine, output)?,
        Command::Refresh => commands::refresh(&engine, output).await?,
        Command::Preload { amounts } => commands::preload(&engine, output, &amounts).await?,
        Command::Watch { duration } => {
            let duration = (duration > 0).then(|| Duration::from_secs(duration));
            commands::watch(&engine, duration).await?
        }
    }

    Ok(())
}
