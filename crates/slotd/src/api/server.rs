use std::sync::Arc;

use error_stack::Report;
use ledger::ReservationLedger;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio::sync::oneshot;
use tracing::error;
use tracing::info;

use super::auth::BearerAuthMiddleware;
use super::auth::SessionStore;
use super::errors::ApiError;
use super::handlers::get_status;
use super::handlers::report_status;
use super::handlers::server_book;
use super::handlers::server_detail;
use super::handlers::server_kill;
use super::handlers::server_list;
use super::handlers::server_login;
use super::handlers::server_unbook;
use super::handlers::user_login;
use super::handlers::user_status;

/// HTTP API server for the reservation ledger
pub struct ApiServer {
    ledger: Arc<ReservationLedger>,
    sessions: SessionStore,
    listen_addr: String,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(ledger: Arc<ReservationLedger>, listen_addr: String) -> Self {
        Self {
            ledger,
            sessions: SessionStore::new(),
            listen_addr,
        }
    }

    /// Build the route table with authentication and tracing applied.
    pub fn routes(&self) -> impl Endpoint {
        Route::new()
            .at("/user/login", post(user_login))
            .at("/server/login", post(server_login))
            .at("/server/status", get(get_status).post(report_status))
            .at("/server/kill", get(server_kill))
            .at("/server/detail", get(server_detail))
            .at("/server/book", get(server_book))
            .at("/server/unbook", get(server_unbook))
            .at("/server/list", get(server_list))
            .at("/user/status", get(user_status))
            .data(self.ledger.clone())
            .data(self.sessions.clone())
            .with(BearerAuthMiddleware::new(self.sessions.clone()))
            .with(Tracing)
    }

    /// Start the API server
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP API server on {}", self.listen_addr);

        let app = self.routes();
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("API server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("API server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = &mut shutdown_rx => {
                info!("API server shutdown requested");
                Ok(())
            }
        }
    }
}
