use std::sync::Arc;

use api_types::ApiResponse;
use api_types::KillListResponse;
use api_types::LoginRequest;
use api_types::LoginResponse;
use api_types::ServerDetail;
use api_types::ServerListResponse;
use api_types::StatusReport;
use api_types::UserStatus;
use ledger::ReservationLedger;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use poem::web::Query;
use poem::Request;
use serde::Deserialize;
use tracing::info;

use super::auth::require_server;
use super::auth::require_user;
use super::auth::Principal;
use super::auth::SessionStore;
use super::errors::to_http_error;

/// Query parameters addressing one server
#[derive(Debug, Deserialize)]
pub struct ServerQuery {
    pub server_id: String,
}

/// Query parameters addressing one slot
#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub server_id: String,
    pub gpu_id: u32,
    pub timestamp: i64,
}

/// Query parameters addressing one user
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub username: String,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[handler]
pub async fn user_login(
    ledger: Data<&Arc<ReservationLedger>>,
    sessions: Data<&SessionStore>,
    Json(req): Json<LoginRequest>,
) -> poem::Result<Json<ApiResponse<LoginResponse>>> {
    ledger
        .authenticate_user(&req.id, &req.password)
        .await
        .map_err(to_http_error)?;

    let token = sessions.issue(Principal::User(req.id.clone()));
    info!(username = %req.id, "user logged in");
    Ok(Json(ApiResponse::ok(
        LoginResponse { token },
        "login successful",
    )))
}

#[handler]
pub async fn server_login(
    ledger: Data<&Arc<ReservationLedger>>,
    sessions: Data<&SessionStore>,
    Json(req): Json<LoginRequest>,
) -> poem::Result<Json<ApiResponse<LoginResponse>>> {
    ledger
        .authenticate_server(&req.id, &req.password)
        .await
        .map_err(to_http_error)?;

    let token = sessions.issue(Principal::Server(req.id.clone()));
    info!(server_id = %req.id, "agent logged in");
    Ok(Json(ApiResponse::ok(
        LoginResponse { token },
        "login successful",
    )))
}

/// Agent pushes its occupancy snapshot; overwrites the stored one.
#[handler]
pub async fn report_status(
    req: &Request,
    query: Query<ServerQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
    Json(report): Json<StatusReport>,
) -> poem::Result<Json<ApiResponse<()>>> {
    require_server(req, &query.server_id)?;

    ledger
        .report_status(&query.server_id, report)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok((), "snapshot stored")))
}

/// Authorized users read back the latest snapshot.
#[handler]
pub async fn get_status(
    req: &Request,
    query: Query<ServerQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<StatusReport>>> {
    let caller = require_user(req)?;

    let authorized = ledger
        .authorized_servers(caller)
        .await
        .map_err(to_http_error)?;
    if !authorized.iter().any(|s| s == &query.server_id) {
        return Err(poem::Error::from_string(
            "not authorized for this server",
            StatusCode::UNAUTHORIZED,
        ));
    }

    let (server_status, timestamp) = ledger
        .snapshot(&query.server_id)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok(
        StatusReport {
            server_status,
            timestamp,
        },
        "snapshot",
    )))
}

/// Agent pulls its kill-list, recomputed fresh on every poll.
#[handler]
pub async fn server_kill(
    req: &Request,
    query: Query<ServerQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<KillListResponse>>> {
    require_server(req, &query.server_id)?;

    let killing_pid_list = ledger
        .kill_list(&query.server_id, now())
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok(
        KillListResponse { killing_pid_list },
        "kill list",
    )))
}

/// Rolling 48-slot calendar plus the latest snapshot.
#[handler]
pub async fn server_detail(
    req: &Request,
    query: Query<ServerQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<ServerDetail>>> {
    require_user(req)?;

    let detail = ledger
        .list_bookings(&query.server_id, now())
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok(detail, "server detail")))
}

#[handler]
pub async fn server_book(
    req: &Request,
    query: Query<SlotQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<()>>> {
    let caller = require_user(req)?;

    ledger
        .book(&query.server_id, query.gpu_id, query.timestamp, caller)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok((), "booked successfully")))
}

#[handler]
pub async fn server_unbook(
    req: &Request,
    query: Query<SlotQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<()>>> {
    let caller = require_user(req)?;

    ledger
        .unbook(&query.server_id, query.gpu_id, query.timestamp, caller)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok((), "unbooked successfully")))
}

#[handler]
pub async fn server_list(
    req: &Request,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<ServerListResponse>>> {
    let caller = require_user(req)?;

    let server_list = ledger
        .authorized_servers(caller)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok(
        ServerListResponse { server_list },
        "authorized servers",
    )))
}

/// Users may query their own record only.
#[handler]
pub async fn user_status(
    req: &Request,
    query: Query<UserQuery>,
    ledger: Data<&Arc<ReservationLedger>>,
) -> poem::Result<Json<ApiResponse<UserStatus>>> {
    let caller = require_user(req)?;
    if caller != query.username {
        return Err(poem::Error::from_string(
            "cannot query another user's status",
            StatusCode::UNAUTHORIZED,
        ));
    }

    let status = ledger
        .user_status(&query.username)
        .await
        .map_err(to_http_error)?;
    Ok(Json(ApiResponse::ok(status, "user status")))
}
