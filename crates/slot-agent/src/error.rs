//! Error types for the agent poll loop.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, Report<AgentError>>;

/// Errors that can occur while talking to the coordinator or sampling GPUs.
#[derive(Debug, Display)]
pub enum AgentError {
    /// Network connectivity issues
    #[display("Network error: {message}")]
    Network { message: String },

    /// HTTP request/response errors
    #[display("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The coordinator rejected our session token
    #[display("Session rejected, re-login required")]
    SessionExpired,

    /// Serialization/deserialization errors
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration errors
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// NVML sampling errors
    #[display("Telemetry error: {message}")]
    Telemetry { message: String },
}

impl Error for AgentError {}
