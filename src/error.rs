use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Whether 5xx responses carry the raw error text. Switched on at startup in local mode.
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Enables or disables raw error text in 5xx bodies.
pub fn expose_details(enabled: bool) {
    EXPOSE_DETAILS.store(enabled, Ordering::Relaxed);
}

/// AppError
///
/// The single error taxonomy of the API. Every handler, extractor and repository method
/// returns it; `IntoResponse` turns it into a `{"message": ...}` body.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or rejected input.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Login failure. Unknown email, inactive account and wrong password all map here.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Missing, malformed or expired bearer token.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Role or ownership mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate or dependent rows. Answered with 400, not 409.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    /// Hashing, token signing or task join failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client-facing message.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::InvalidCredentials => "Email ou senha inválidos".to_string(),
            AppError::Unauthenticated => {
                "Por favor, faça login para acessar este recurso".to_string()
            }
            AppError::Storage(_) | AppError::Internal(_) => {
                "Erro interno do servidor".to_string()
            }
        }
    }

    pub fn admin_only() -> Self {
        AppError::Forbidden(
            "Acesso negado. Apenas administradores podem acessar este recurso.".to_string(),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({ "message": self.message() });

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            if EXPOSE_DETAILS.load(Ordering::Relaxed) {
                body["error"] = serde_json::Value::String(self.to_string());
            }
        }

        (status, Json(body)).into_response()
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("token signing failed: {err}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task failed: {err}"))
    }
}
