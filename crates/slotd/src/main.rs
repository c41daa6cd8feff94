mod api;
mod config;
mod logging;
mod provision;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use ledger::KillPolicy;
use ledger::MemoryStore;
use ledger::ReservationLedger;
use tokio::sync::oneshot;
use tracing::info;
use tracing::warn;

use crate::api::ApiServer;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::DaemonArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
    }
}

async fn run_daemon(args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(args.log_file.as_deref());

    info!("Starting slot reservation coordinator");

    let ledger = Arc::new(
        ReservationLedger::new(Arc::new(MemoryStore::new()))
            .with_display_offset(args.display_utc_offset_hours)
            .with_policy(KillPolicy {
                spare_owner: args.spare_owner,
            }),
    );

    match &args.provision_path {
        Some(path) => provision::apply(&ledger, path)
            .await
            .context("startup provisioning failed")?,
        None => warn!("no provisioning file given; starting with an empty ledger"),
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    ApiServer::new(ledger, args.listen)
        .run(shutdown_rx)
        .await
        .map_err(|report| anyhow::anyhow!("{report:?}"))
        .context("API server exited with an error")?;

    Ok(())
}
