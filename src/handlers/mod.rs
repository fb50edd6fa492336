//! HTTP handlers, one module per resource.
//!
//! Handlers extract `AuthUser` / `AdminUser` for identity, pull the shared `AppState`,
//! validate input, and delegate persistence to the `Repository` trait. Every failure is
//! an `AppError`, rendered as `{"message": ...}`.

use axum::Json;

use crate::{error::AppError, models::HealthResponse};

pub mod auth;
pub mod dashboard;
pub mod municipalities;
pub mod solutions;
pub mod users;

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// health
///
/// [Public Route] Liveness check for monitors and load balancers.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Hub Maximiza API está funcionando!".to_string(),
    })
}

// --- Input helpers shared by the resource modules ---

/// Trims `raw` and rejects it with `message` when nothing is left.
pub(crate) fn required(raw: &str, message: &str) -> Result<String, AppError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::Validation(message.to_string()));
    }
    Ok(value.to_string())
}

/// Trims an optional free-text field; blank becomes `None`.
pub(crate) fn optional_text(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "A senha deve ter pelo menos {MIN_PASSWORD_LEN} caracteres"
        )));
    }
    Ok(())
}
