use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex},
};

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AdminSeed, AppConfig, MIN_BCRYPT_COST},
    error::AppError,
    models::{NewUser, Role, UserRecord, normalize_email},
    repository::Repository,
};

/// Claims
///
/// The payload carried inside every bearer token. Identity and role are trusted as-is on
/// each request; no database lookup backs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The UUID of the user (`users.id`).
    pub id: Uuid,
    pub email: String,
    /// Role at the time the token was issued. A later role change only takes effect once
    /// the client logs in again.
    pub role: Role,
    /// Issued At, seconds since the epoch.
    pub iat: usize,
    /// Expiration Time, seconds since the epoch. Always validated.
    pub exp: usize,
}

/// issue_token
///
/// Mints an HS256 token for `user`, valid for `config.jwt_expire_hours`.
pub fn issue_token(config: &AppConfig, user: &UserRecord) -> Result<String, AppError> {
    let now = Utc::now();
    let expires_at = now + Duration::hours(config.jwt_expire_hours);

    let claims = Claims {
        id: user.id,
        email: user.email.clone(),
        role: user.role,
        iat: now.timestamp() as usize,
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

/// decode_token
///
/// Verifies signature and expiry. Every failure collapses into `Unauthenticated`; the
/// kind is only kept for the debug log.
pub fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

    let mut validation = Validation::default();
    validation.validate_exp = true;

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                kind => tracing::debug!(?kind, "rejected invalid token"),
            }
            Err(AppError::Unauthenticated)
        }
    }
}

// --- Password Hashing ---

const DUMMY_PASSWORD: &str = "hub-maximiza-timing-equalizer";

// Dummy hashes keyed by cost. The unknown-email path verifies against the one matching
// the configured cost, so it does the same bcrypt work as a real check.
static DUMMY_HASHES: LazyLock<Mutex<HashMap<u32, String>>> = LazyLock::new(Default::default);

fn cached_dummy_hash(cost: u32) -> Option<String> {
    DUMMY_HASHES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&cost)
        .cloned()
}

async fn dummy_hash(cost: u32) -> Result<String, AppError> {
    let cost = cost.max(MIN_BCRYPT_COST);
    if let Some(hash) = cached_dummy_hash(cost) {
        return Ok(hash);
    }
    let hash = hash_password(DUMMY_PASSWORD.to_string(), cost).await?;
    Ok(DUMMY_HASHES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .entry(cost)
        .or_insert(hash)
        .clone())
}

/// Builds the dummy hash for `cost` ahead of the first login, so even that one does not
/// answer an unknown email faster.
pub async fn prime_dummy_hash(cost: u32) -> Result<(), AppError> {
    dummy_hash(cost).await.map(|_| ())
}

/// Hashes on the blocking pool; bcrypt would otherwise stall a runtime worker.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    let cost = cost.max(MIN_BCRYPT_COST);
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(valid)
}

/// Spends one verification worth of work at `cost` and discards the result.
pub async fn burn_verification(password: String, cost: u32) {
    match dummy_hash(cost).await {
        Ok(hash) => {
            let _ = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await;
        }
        Err(e) => tracing::warn!(error = ?e, "failed to build dummy hash"),
    }
}

/// ensure_admin
///
/// Creates the bootstrap administrator unless an account with that email already exists.
/// Returns whether an account was created.
pub async fn ensure_admin(
    repo: &dyn Repository,
    seed: &AdminSeed,
    cost: u32,
) -> Result<bool, AppError> {
    let email = normalize_email(&seed.email);
    if repo.find_user_by_email(&email).await?.is_some() {
        return Ok(false);
    }

    let password_hash = hash_password(seed.password.clone(), cost).await?;
    let admin = repo
        .create_user(NewUser {
            name: seed.name.clone(),
            email,
            password_hash,
            role: Role::Admin,
            municipality_id: None,
        })
        .await?;

    tracing::info!(user_id = %admin.id, email = %admin.email, "bootstrap admin created");
    Ok(true)
}

// --- Extractors ---

/// AuthUser
///
/// The resolved identity of an authenticated request, decoded straight from the token
/// claims.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Usable as a handler argument on any protected route. Reads the `Authorization: Bearer`
/// header and validates the token against the configured secret.
///
/// When the auth middleware already resolved the identity it is reused from the request
/// extensions instead of decoding the token a second time.
///
/// Rejection: `AppError::Unauthenticated` (401) on a missing, malformed, forged or
/// expired token.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthenticated)?;

        let claims = decode_token(&config, token.trim())?;
        Ok(AuthUser::from(claims))
    }
}

/// AdminUser
///
/// Admin gate as an extractor: authenticates like `AuthUser`, then requires
/// `role == admin`.
///
/// Rejection: 401 when unauthenticated, 403 when authenticated without the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::debug!(user_id = %user.id, "admin gate rejected request");
            return Err(AppError::admin_only());
        }
        Ok(AdminUser(user))
    }
}
