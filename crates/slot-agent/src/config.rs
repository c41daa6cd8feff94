use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "slot-agent", about = "GPU slot enforcement agent", version)]
pub struct AgentArgs {
    #[arg(
        long,
        env = "SLOT_AGENT_SERVER_URL",
        help = "Base URL of the coordinator, e.g. http://10.0.0.1:8000"
    )]
    pub server_url: String,

    #[arg(
        long,
        env = "SLOT_AGENT_SERVER_ID",
        help = "Server identity this agent reports as"
    )]
    pub server_id: String,

    #[arg(
        long,
        env = "SLOT_AGENT_PASSWORD",
        help = "Password for the server identity"
    )]
    pub password: String,

    #[arg(
        long,
        env = "SLOT_AGENT_INTERVAL_SECS",
        default_value_t = 10,
        help = "Seconds between poll cycles"
    )]
    pub interval_secs: u64,

    #[arg(
        long,
        env = "SLOT_AGENT_TERM_GRACE_SECS",
        default_value_t = 5,
        help = "Seconds to wait after SIGTERM before escalating to SIGKILL"
    )]
    pub term_grace_secs: u64,
}

impl AgentArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn term_grace(&self) -> Duration {
        Duration::from_secs(self.term_grace_secs)
    }
}
