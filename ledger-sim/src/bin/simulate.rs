//! Ledger simulation binary

use anyhow::Context;
use ledger_sim::{Config, Simulation};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("LEDGER_SIM_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        service = %config.service_name,
        backend = ?config.backend,
        "Starting ledger simulation"
    );

    // Ctrl-C stops workers between requests
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight transfers");
            let _ = stop_tx.send(true);
        }
    });

    let simulation = Simulation::open(config)?.with_stop_signal(stop_rx);
    let summary = simulation.run().await?;

    println!("Account Balances:");
    for account in simulation.store().list_accounts()? {
        println!("  {}: {}", account.id, account.balance);
    }

    println!();
    println!("Transactions:");
    for record in simulation.store().list_transfers()? {
        println!("{}", record);
    }

    tracing::info!(
        committed = summary.report.committed(),
        exhausted = summary.report.exhausted(),
        faulted = summary.report.faulted(),
        transfers_logged = summary.audit.transfers,
        "Simulation complete"
    );
    tracing::debug!(metrics = %simulation.metrics().render()?, "Final metrics");

    Ok(())
}
