use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use chrono::Utc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod access_log;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::{AdminUser, AuthUser};
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the OpenAPI
/// document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::auth::login, handlers::auth::register, handlers::auth::me,
        handlers::auth::logout, handlers::auth::change_password,
        handlers::users::list_users, handlers::users::get_user, handlers::users::update_user,
        handlers::users::delete_user, handlers::users::replace_user_solutions,
        handlers::municipalities::list_municipalities,
        handlers::municipalities::get_municipality,
        handlers::municipalities::create_municipality,
        handlers::municipalities::update_municipality,
        handlers::municipalities::delete_municipality,
        handlers::solutions::list_solutions, handlers::solutions::get_solution,
        handlers::solutions::create_solution, handlers::solutions::update_solution,
        handlers::solutions::delete_solution, handlers::solutions::access_solution,
        handlers::dashboard::stats, handlers::dashboard::charts,
        handlers::dashboard::online_users, handlers::dashboard::recent_activities,
        handlers::dashboard::user_dashboard
    ),
    components(
        schemas(
            models::Role, models::AccessAction, models::User, models::UserSummary,
            models::UserDetail, models::UserProfile, models::Municipality,
            models::MunicipalityOverview, models::Solution, models::SolutionOverview,
            models::AccessLog, models::LoginRequest, models::RegisterUserRequest,
            models::UpdateUserRequest, models::ReplaceGrantsRequest,
            models::ChangePasswordRequest, models::CreateMunicipalityRequest,
            models::UpdateMunicipalityRequest, models::CreateSolutionRequest,
            models::UpdateSolutionRequest, models::LoginResponse, models::MeResponse,
            models::MessageResponse, models::HealthResponse, models::UserMutationResponse,
            models::MunicipalityMutationResponse, models::SolutionMutationResponse,
            models::DashboardStats, models::WeeklyBucket, models::SolutionUsage,
            models::ChartsData, models::PresenceStatus, models::OnlineUser,
            models::ActivityItem, models::RecentAccess, models::UserDashboard,
        )
    ),
    tags(
        (name = "hub-maximiza", description = "Hub Maximiza administration API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cloneable container holding the shared services. Handlers take it whole
/// through `State<AppState>`; extractors pull the parts they need through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: Postgres in production, the in-memory double in tests.
    pub repo: RepositoryState,
    /// Configuration: The loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl AppState {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self { repo, config }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// Stretches the caller's presence session; failures only cost accuracy of "time online".
async fn refresh_session(repo: &RepositoryState, user: &AuthUser) {
    if let Err(e) = repo.touch_session(user.id, Utc::now()).await {
        tracing::warn!(error = ?e, user_id = %user.id, "failed to refresh session");
    }
}

/// auth_middleware
///
/// Enforces authentication for `authenticated_routes`. The `AuthUser` extractor rejects
/// with 401 before the handler runs; on success the identity is stashed in the request
/// extensions so handlers do not decode the token again.
async fn auth_middleware(
    State(repo): State<RepositoryState>,
    auth_user: AuthUser,
    mut request: Request,
    next: Next,
) -> Response {
    refresh_session(&repo, &auth_user).await;
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// admin_gate
///
/// Enforces `role == admin` for `admin_routes`: 401 without a valid token, 403 for
/// authenticated non-admins.
async fn admin_gate(
    State(repo): State<RepositoryState>,
    AdminUser(admin): AdminUser,
    mut request: Request,
    next: Next,
) -> Response {
    refresh_session(&repo, &admin).await;
    request.extensions_mut().insert(admin);
    next.run(request).await
}

/// create_router
///
/// Assembles the application's entire routing structure, applies global and scoped
/// middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: No middleware applied.
        .merge(public::public_routes())
        // Authenticated Routes: Protected by the `auth_middleware`.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Admin Routes: Protected by the `admin_gate`, which authenticates first.
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), admin_gate)),
        )
        // Apply the Unified State to all routes.
        .with_state(state);

    // 3. Observability and Correlation Layers (Applied outermost/first)
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing: one span per request, carrying the request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation: echo x-request-id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the `http_request` span for `TraceLayer`, tagging it with the `x-request-id`
/// so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
