use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    AppState,
    auth::{AdminUser, AuthUser},
    dashboard::{self, Period},
    error::AppError,
    models::{ActivityItem, ChartsData, DashboardStats, OnlineUser, UserDashboard},
};

/// StatsQuery
///
/// `period` is one of `today` (default), `week`, `month`, `year`. Any other value
/// disables the time filter.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[utoipa::path(
    get,
    path = "/dashboard/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Headline counters", body = DashboardStats),
        (status = 403, description = "Caller is not an admin")
    )
)]
pub async fn stats(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DashboardStats>, AppError> {
    let period = Period::parse(query.period.as_deref());
    let stats = dashboard::stats(state.repo.as_ref(), period, Utc::now()).await?;
    Ok(Json(stats))
}

#[utoipa::path(
    get,
    path = "/dashboard/charts",
    responses((status = 200, description = "Weekly access and solution usage", body = ChartsData))
)]
pub async fn charts(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<Json<ChartsData>, AppError> {
    let charts = dashboard::charts(state.repo.as_ref(), Utc::now()).await?;
    Ok(Json(charts))
}

#[utoipa::path(
    get,
    path = "/dashboard/online-users",
    responses((status = 200, description = "Users seen in the last 24h", body = [OnlineUser]))
)]
pub async fn online_users(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<OnlineUser>>, AppError> {
    let users = dashboard::online_users(state.repo.as_ref(), &state.config, Utc::now()).await?;
    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/dashboard/recent-activities",
    responses((status = 200, description = "Latest access-log events", body = [ActivityItem]))
)]
pub async fn recent_activities(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ActivityItem>>, AppError> {
    let items = dashboard::recent_activities(state.repo.as_ref(), Utc::now()).await?;
    Ok(Json(items))
}

/// user_dashboard
///
/// [Authenticated Route] The caller's active grants and their last solution accesses.
#[utoipa::path(
    get,
    path = "/dashboard/user-dashboard",
    responses((status = 200, description = "Personal dashboard", body = UserDashboard))
)]
pub async fn user_dashboard(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserDashboard>, AppError> {
    let view = dashboard::user_dashboard(state.repo.as_ref(), id, Utc::now()).await?;
    Ok(Json(view))
}
