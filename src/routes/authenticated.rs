use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Routes open to any caller holding a valid token. The `auth_middleware` layer applied
/// in `create_router` rejects anonymous requests before they reach a handler.
///
/// Some paths mix access levels per method: their write handlers take the `AdminUser`
/// extractor and answer 403 to regular users.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Identity ---
        .route("/auth/me", get(handlers::auth::me))
        // Audit-only; the token itself stays valid until it expires.
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/password", put(handlers::auth::change_password))
        // --- Users ---
        // GET: admin or the account owner. PUT/DELETE: admin.
        .route(
            "/users/{id}",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        // --- Municipalities (read: any, write: admin) ---
        .route(
            "/municipalities",
            get(handlers::municipalities::list_municipalities)
                .post(handlers::municipalities::create_municipality),
        )
        .route(
            "/municipalities/{id}",
            get(handlers::municipalities::get_municipality)
                .put(handlers::municipalities::update_municipality)
                .delete(handlers::municipalities::delete_municipality),
        )
        // --- Solutions (read: grant-scoped, write: admin) ---
        .route(
            "/solutions",
            get(handlers::solutions::list_solutions).post(handlers::solutions::create_solution),
        )
        .route(
            "/solutions/{id}",
            get(handlers::solutions::get_solution)
                .put(handlers::solutions::update_solution)
                .delete(handlers::solutions::delete_solution),
        )
        // POST /solutions/{id}/access
        // Appends an access_solution row to the audit log and refreshes the session.
        .route(
            "/solutions/{id}/access",
            post(handlers::solutions::access_solution),
        )
        // --- Personal dashboard ---
        .route(
            "/dashboard/user-dashboard",
            get(handlers::dashboard::user_dashboard),
        )
}
