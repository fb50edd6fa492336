use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check; answers `{status, message}` without touching the database.
        .route("/health", get(handlers::health))
        // POST /auth/login
        // Exchanges email and password for a bearer token.
        .route("/auth/login", post(handlers::auth::login))
}
