use core::error::Error;

use api_types::ApiResponse;
use error_stack::Report;
use ledger::LedgerError;
use poem::http::StatusCode;
use poem::Response;

/// API server errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}

/// HTTP status for each ledger error kind.
///
/// Authorization (401) and conflict (409) must stay distinct so clients
/// can tell "log in again" apart from "already booked".
pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        LedgerError::SlotConflict { .. } => StatusCode::CONFLICT,
        LedgerError::InsufficientCredit => StatusCode::PAYMENT_REQUIRED,
        LedgerError::NotBooked { .. }
        | LedgerError::ServerNotFound { .. }
        | LedgerError::UserNotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
        LedgerError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Convert a ledger failure into a JSON error response.
pub fn to_http_error(err: Report<LedgerError>) -> poem::Error {
    let status = status_for(err.current_context());
    let envelope = ApiResponse::<()>::err(err.current_context().to_string());
    let body = serde_json::to_string(&envelope)
        .unwrap_or_else(|_| r#"{"success":false,"data":null,"message":"internal error"}"#.into());
    poem::Error::from_response(
        Response::builder()
            .status(status)
            .content_type("application/json")
            .body(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_conflict_map_to_distinct_codes() {
        let unauthorized = LedgerError::Unauthorized {
            reason: "nope".to_string(),
        };
        let conflict = LedgerError::SlotConflict {
            gpu_id: 0,
            timestamp: 0,
        };

        assert_eq!(status_for(&unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&conflict), StatusCode::CONFLICT);
        assert_ne!(status_for(&unauthorized), status_for(&conflict));
    }

    #[test]
    fn remaining_kinds_have_expected_codes() {
        assert_eq!(
            status_for(&LedgerError::InsufficientCredit),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_for(&LedgerError::NotBooked {
                gpu_id: 0,
                timestamp: 0
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&LedgerError::MalformedInput {
                reason: String::new()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&LedgerError::StoreUnavailable {
                reason: String::new()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
