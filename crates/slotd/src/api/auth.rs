//! Bearer-token session authentication.
//!
//! Login endpoints mint an opaque session token bound to a principal;
//! the middleware resolves the token on every other request and stores
//! the principal in the request extensions for handlers to consume.

use std::sync::Arc;

use dashmap::DashMap;
use poem::http::StatusCode;
use poem::Endpoint;
use poem::Middleware;
use poem::Request;
use poem::Result as PoemResult;
use tracing::debug;
use uuid::Uuid;

/// Authenticated caller identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Interactive user, booking and browsing calendars
    User(String),
    /// Agent session scoped to exactly one server identity
    Server(String),
}

/// In-memory token -> principal table.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Principal>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh session token for `principal`.
    pub fn issue(&self, principal: Principal) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), principal);
        token
    }

    pub fn resolve(&self, token: &str) -> Option<Principal> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.remove(token);
    }
}

/// Paths reachable without a session.
const EXEMPT_PATHS: &[&str] = &["/server/login", "/user/login"];

/// Session authentication middleware
pub struct BearerAuthMiddleware {
    sessions: SessionStore,
}

impl BearerAuthMiddleware {
    pub fn new(sessions: SessionStore) -> Self {
        Self { sessions }
    }
}

impl<E> Middleware<E> for BearerAuthMiddleware
where E: Endpoint
{
    type Output = BearerAuthEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        BearerAuthEndpoint {
            inner: ep,
            sessions: self.sessions.clone(),
        }
    }
}

pub struct BearerAuthEndpoint<E> {
    inner: E,
    sessions: SessionStore,
}

impl<E> Endpoint for BearerAuthEndpoint<E>
where E: Endpoint
{
    type Output = E::Output;

    async fn call(&self, mut req: Request) -> PoemResult<Self::Output> {
        if EXEMPT_PATHS.contains(&req.uri().path()) {
            return self.inner.call(req).await;
        }

        let auth_header = req
            .headers()
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                poem::Error::from_string("Missing authorization header", StatusCode::UNAUTHORIZED)
            })?;

        let Some(token) = auth_header.strip_prefix("Bearer ") else {
            return Err(poem::Error::from_string(
                "Invalid authorization header format",
                StatusCode::UNAUTHORIZED,
            ));
        };

        let principal = self.sessions.resolve(token).ok_or_else(|| {
            poem::Error::from_string("Unknown or expired session", StatusCode::UNAUTHORIZED)
        })?;

        debug!(?principal, "session resolved");
        req.extensions_mut().insert(principal);
        self.inner.call(req).await
    }
}

/// Extract the user principal, or fail with 401.
pub fn require_user(req: &Request) -> PoemResult<&str> {
    match req.extensions().get::<Principal>() {
        Some(Principal::User(name)) => Ok(name),
        _ => Err(poem::Error::from_string(
            "user session required",
            StatusCode::UNAUTHORIZED,
        )),
    }
}

/// Extract the server principal and check it matches `server_id`.
pub fn require_server(req: &Request, server_id: &str) -> PoemResult<()> {
    match req.extensions().get::<Principal>() {
        Some(Principal::Server(id)) if id == server_id => Ok(()),
        _ => Err(poem::Error::from_string(
            "server session required for this server id",
            StatusCode::UNAUTHORIZED,
        )),
    }
}
