//! Subcommand handlers.

use std::time::{Duration, Instant};

use anyhow::Context;
use pricedesk_common::Currency;
use pricedesk_fx::{ConversionBackend, PriceEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::report::{self, WatchTally};

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, lines: impl FnOnce() -> Vec<String>) -> anyhow::Result<()> {
        match self {
            Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Output::Text => {
                for line in lines() {
                    println!("{line}");
                }
            }
        }
        Ok(())
    }
}

pub async fn convert(
    engine: &PriceEngine,
    output: Output,
    amount: Decimal,
    from: &Currency,
    to: &Currency,
) -> anyhow::Result<()> {
    engine.directory().ensure_not_empty()?;
    let conversion = engine.convert(amount, from, to).await;
    if conversion.source.is_degraded() {
        warn!(source = conversion.source.as_str(), "Conversion used fallback rates");
    }
    output.emit(&conversion, || {
        vec![report::conversion_line(&conversion, engine.directory())]
    })
}

pub fn currencies(engine: &PriceEngine, output: Output) -> anyhow::Result<()> {
    engine.directory().ensure_not_empty()?;
    let supported = engine.directory().supported();
    output.emit(&supported, || report::currency_rows(engine.directory()))
}

pub async fn rates(engine: &PriceEngine, output: Output, base: &Currency) -> anyhow::Result<()> {
    engine.directory().require(base)?;

    let snapshot = engine
        .backend()
        .fetch_rates_for_base(base)
        .await
        .with_context(|| format!("failed to load rates for {base}"))?;

    let directory = engine.directory();
    output.emit(&snapshot, || {
        let mut codes: Vec<&Currency> = snapshot
            .rates
            .keys()
            .filter(|code| directory.contains(code))
            .collect();
        codes.sort();

        let mut lines = vec![format!("{} rates as of {}", snapshot.base, snapshot.date)];
        lines.extend(codes.into_iter().map(|code| {
            format!("{:<4} {}", code.code(), snapshot.rates[code].normalize())
        }));
        lines
    })
}

pub fn status(engine: &PriceEngine, output: Output) -> anyhow::Result<()> {
    let stats = engine.stats();
    output.emit(&stats, || report::status_lines(&stats))
}

pub async fn refresh(engine: &PriceEngine, output: Output) -> anyhow::Result<()> {
    let result = engine.refresh().await.context("rate refresh failed")?;
    output.emit(&result, || vec![report::sync_line(&result)])
}

pub async fn preload(engine: &PriceEngine, output: Output, amounts: &[Decimal]) -> anyhow::Result<()> {
    let started = Instant::now();
    let result = engine.preload(amounts).await;
    let elapsed = started.elapsed();

    output.emit(&result, || {
        let mut lines = vec![report::preload_line(&result, elapsed)];
        lines.extend(report::status_lines(&engine.stats()));
        lines
    })
}

/// Run the background tasks and print every freshness change until Ctrl+C
/// or until `duration` has passed.
pub async fn watch(engine: &PriceEngine, duration: Option<Duration>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = engine.spawn_background(shutdown_rx);
    let mut status = engine.monitor().subscribe();
    let mut tally = WatchTally::new();

    let current = *status.borrow_and_update();
    tally.record(current);
    println!("freshness: {current} (last update {})", engine.monitor().last_update_age());

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if tally.record(current) {
                    println!("freshness: {current} (last update {})", engine.monitor().last_update_age());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("Shutdown signal received");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    // Receivers may already be gone if every task exited.
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    println!("{}", tally.summary());
    Ok(())
}
