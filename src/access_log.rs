use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{AccessAction, AccessLog, NewAccessLog},
    repository::Repository,
};

/// ClientInfo
///
/// Origin metadata stored with each access-log row. The IP is the socket peer, or the
/// first `X-Forwarded-For` entry when `trust_proxy` is set. Never rejects.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl<S> FromRequestParts<S> for ClientInfo
where
    AppConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        // Clients can send any X-Forwarded-For they like; only a trusted proxy's counts.
        let forwarded = if config.trust_proxy {
            parts
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        } else {
            None
        };

        let ip_address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(ClientInfo {
            ip_address,
            user_agent,
        })
    }
}

/// record
///
/// Appends one event to the access log and returns the stored row. Storage failures
/// propagate.
pub async fn record(
    repo: &dyn Repository,
    user_id: Uuid,
    action: AccessAction,
    solution_id: Option<Uuid>,
    client: &ClientInfo,
    at: DateTime<Utc>,
) -> Result<AccessLog, AppError> {
    let entry = NewAccessLog {
        user_id,
        solution_id,
        action,
        ip_address: client.ip_address.clone(),
        user_agent: client.user_agent.clone(),
        created_at: at,
    };
    let log = repo.append_access_log(entry).await?;
    tracing::debug!(log_id = log.id, %user_id, action = action.as_str(), "access recorded");
    Ok(log)
}

/// Like `record`, but a failed write is logged and swallowed.
pub async fn record_best_effort(
    repo: &dyn Repository,
    user_id: Uuid,
    action: AccessAction,
    solution_id: Option<Uuid>,
    client: &ClientInfo,
    at: DateTime<Utc>,
) {
    if let Err(e) = record(repo, user_id, action, solution_id, client, at).await {
        tracing::warn!(error = ?e, %user_id, action = action.as_str(), "failed to write access log");
    }
}
