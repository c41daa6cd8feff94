use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(name = "slotd", about = "GPU slot reservation coordinator", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator daemon
    Daemon(DaemonArgs),
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "SLOTD_LISTEN",
        default_value = "0.0.0.0:8000",
        help = "Listen address for the HTTP API"
    )]
    pub listen: String,

    #[arg(
        long,
        env = "SLOTD_PROVISION_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file seeding user and server records at startup"
    )]
    pub provision_path: Option<PathBuf>,

    #[arg(
        long,
        env = "SLOTD_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Rolling log file path, e.g. logs/slotd.log; stderr only when unset"
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = ledger::hours::DEFAULT_DISPLAY_OFFSET_HOURS,
        help = "Fixed UTC offset in hours for calendar display times"
    )]
    pub display_utc_offset_hours: i32,

    #[arg(
        long,
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "Spare the booking owner's own processes from the kill list"
    )]
    pub spare_owner: bool,
}
