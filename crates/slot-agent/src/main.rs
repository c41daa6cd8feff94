mod client;
mod config;
mod error;
mod telemetry;
mod terminate;

use std::time::Duration;

use anyhow::Result;
use api_types::StatusReport;
use clap::Parser;
use tracing::info;
use tracing::warn;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::client::AgentClient;
use crate::config::AgentArgs;
use crate::telemetry::GpuSampler;
use crate::terminate::terminate;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn main() -> Result<()> {
    init_logging();

    let args = AgentArgs::parse();
    info!(
        server_url = %args.server_url,
        server_id = %args.server_id,
        interval_secs = args.interval_secs,
        "starting slot agent"
    );

    let sampler = GpuSampler::init();
    let mut client = AgentClient::new(&args).map_err(|report| anyhow::anyhow!("{report:?}"))?;

    loop {
        run_cycle(&mut client, &sampler, args.term_grace());
        std::thread::sleep(args.poll_interval());
    }
}

/// One poll cycle: push the snapshot, pull the kill-list, apply it.
/// Failures are logged and the loop carries on; the coordinator
/// recomputes everything fresh on the next poll.
fn run_cycle(client: &mut AgentClient, sampler: &GpuSampler, grace: Duration) {
    let report = StatusReport {
        server_status: sampler.sample(),
        timestamp: chrono::Utc::now().timestamp(),
    };
    if let Err(report_err) = client.push_status(&report) {
        warn!("failed to push snapshot: {report_err:?}");
    }

    let pids = match client.fetch_kill_list() {
        Ok(pids) => pids,
        Err(fetch_err) => {
            warn!("failed to fetch kill-list: {fetch_err:?}");
            return;
        }
    };

    for pid in pids {
        let outcome = terminate(pid, grace);
        info!(pid, ?outcome, "applied kill-list entry");
    }
}
