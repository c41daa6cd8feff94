//! Error types for ledger operations.

use core::error::Error;

use error_stack::Report;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, Report<LedgerError>>;

/// Errors that ledger operations report to their callers.
///
/// Authorization and conflict failures are distinct kinds so a client
/// can tell "log in again" apart from "already booked".
#[derive(Debug, derive_more::Display)]
pub enum LedgerError {
    /// Caller lacks the required user or server scope
    #[display("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// The slot already holds a booking
    #[display("slot already booked: gpu {gpu_id} at {timestamp}")]
    SlotConflict { gpu_id: u32, timestamp: i64 },

    /// Caller's credit balance is zero
    #[display("insufficient credit")]
    InsufficientCredit,

    /// No booking exists at the addressed slot
    #[display("slot not booked: gpu {gpu_id} at {timestamp}")]
    NotBooked { gpu_id: u32, timestamp: i64 },

    /// No server record under this identity
    #[display("server not found: {server_id}")]
    ServerNotFound { server_id: String },

    /// No user record under this identity
    #[display("user not found: {username}")]
    UserNotFound { username: String },

    /// A required field is missing or out of range
    #[display("malformed input: {reason}")]
    MalformedInput { reason: String },

    /// The backing key/value store failed
    #[display("ledger store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

impl Error for LedgerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_render_distinct_messages() {
        let conflict = LedgerError::SlotConflict {
            gpu_id: 1,
            timestamp: 3600,
        };
        assert_eq!(conflict.to_string(), "slot already booked: gpu 1 at 3600");

        let unauthorized = LedgerError::Unauthorized {
            reason: "not your booking".to_string(),
        };
        assert_eq!(unauthorized.to_string(), "unauthorized: not your booking");

        let not_booked = LedgerError::NotBooked {
            gpu_id: 0,
            timestamp: 0,
        };
        assert_eq!(not_booked.to_string(), "slot not booked: gpu 0 at 0");
    }
}
