use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Routes exclusively accessible to users with the `admin` role. `create_router` wraps
/// this router in the `admin_gate` layer: anonymous callers get 401 and authenticated
/// non-admins get 403 before any handler runs.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/register
        // Account creation is admin-only; there is no self-signup.
        .route("/auth/register", post(handlers::auth::register))
        // GET /users?municipality_id=&search=
        .route("/users", get(handlers::users::list_users))
        // PUT /users/{id}/solutions
        // Transactional replacement of a user's grant set.
        .route(
            "/users/{id}/solutions",
            put(handlers::users::replace_user_solutions),
        )
        // --- Analytics ---
        // All four are recomputed from the access log on every request.
        .route("/dashboard/stats", get(handlers::dashboard::stats))
        .route("/dashboard/charts", get(handlers::dashboard::charts))
        .route(
            "/dashboard/online-users",
            get(handlers::dashboard::online_users),
        )
        .route(
            "/dashboard/recent-activities",
            get(handlers::dashboard::recent_activities),
        )
}
