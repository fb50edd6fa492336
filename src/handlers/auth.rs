use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;

use super::{check_password, required};
use crate::{
    AppState,
    access_log::{self, ClientInfo},
    auth::{self, AdminUser, AuthUser},
    error::AppError,
    models::{
        AccessAction, ChangePasswordRequest, LoginRequest, LoginResponse, MeResponse,
        MessageResponse, NewUser, RegisterUserRequest, Role, Solution, User, UserChanges,
        UserMutationResponse, UserProfile, UserRecord, is_valid_email, normalize_email,
    },
};

/// Solutions shown in an identity payload. Admins implicitly see everything, so their
/// list stays empty.
async fn profile_solutions(state: &AppState, user: &UserRecord) -> Result<Vec<Solution>, AppError> {
    if user.role.is_admin() {
        return Ok(Vec::new());
    }
    state.repo.granted_solutions(user.id, true).await
}

/// login
///
/// [Public Route] Exchanges email and password for a bearer token.
///
/// Unknown email, deactivated account and wrong password all answer with the same 401
/// body. The unknown-email path still runs a bcrypt verification so its latency matches.
/// Writing the audit row and opening the presence session are best-effort.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 400, description = "Malformed credentials"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) || payload.password.is_empty() {
        return Err(AppError::Validation("Informe um email válido e a senha".to_string()));
    }

    let Some(user) = state.repo.find_user_by_email(&email).await? else {
        auth::burn_verification(payload.password, state.config.bcrypt_cost).await;
        tracing::info!("login rejected: unknown email");
        return Err(AppError::InvalidCredentials);
    };

    let valid = auth::verify_password(payload.password, user.password_hash.clone()).await?;
    if !valid || !user.active {
        tracing::info!(user_id = %user.id, active = user.active, "login rejected");
        return Err(AppError::InvalidCredentials);
    }

    let now = Utc::now();
    state.repo.record_login(user.id, now).await?;
    access_log::record_best_effort(
        state.repo.as_ref(),
        user.id,
        AccessAction::Login,
        None,
        &client,
        now,
    )
    .await;
    if let Err(e) = state.repo.open_session(user.id, now).await {
        tracing::warn!(error = ?e, user_id = %user.id, "failed to open session");
    }

    let token = auth::issue_token(&state.config, &user)?;
    let solutions = profile_solutions(&state, &user).await?;

    tracing::info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: UserProfile::new(user, solutions),
    }))
}

/// register
///
/// [Admin Route] Creates an account. The password is hashed with the configured bcrypt
/// cost and never echoed back.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User created", body = UserMutationResponse),
        (status = 400, description = "Validation failure or duplicate email"),
        (status = 403, description = "Caller is not an admin")
    )
)]
pub async fn register(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserMutationResponse>), AppError> {
    let name = required(&payload.name, "Nome é obrigatório")?;
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Email inválido".to_string()));
    }
    check_password(&payload.password)?;
    let role: Role = payload
        .role
        .trim()
        .parse()
        .map_err(|_| AppError::Validation("Perfil deve ser 'admin' ou 'user'".to_string()))?;

    if state.repo.email_in_use(&email, None).await? {
        return Err(AppError::Conflict("Este email já está cadastrado".to_string()));
    }
    if let Some(municipality_id) = payload.municipality_id {
        if state.repo.find_municipality(municipality_id).await?.is_none() {
            return Err(AppError::Validation("Município não encontrado".to_string()));
        }
    }

    let password_hash = auth::hash_password(payload.password, state.config.bcrypt_cost).await?;
    let user = state
        .repo
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role,
            municipality_id: payload.municipality_id,
        })
        .await?;

    tracing::info!(user_id = %user.id, created_by = %admin.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(UserMutationResponse {
            message: "Usuário criado com sucesso".to_string(),
            user: User::from(user),
        }),
    ))
}

/// me
///
/// [Authenticated Route] Re-reads the caller's live account. A deactivated account is
/// still served while its token is valid; a deleted one is a 404.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Account no longer exists")
    )
)]
pub async fn me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MeResponse>, AppError> {
    let user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Usuário não encontrado".to_string()))?;
    let solutions = profile_solutions(&state, &user).await?;

    Ok(Json(MeResponse {
        user: UserProfile::new(user, solutions),
    }))
}

/// logout
///
/// [Authenticated Route] Audit-only: tokens are stateless and stay valid until expiry.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Logout recorded", body = MessageResponse))
)]
pub async fn logout(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    client: ClientInfo,
) -> Json<MessageResponse> {
    access_log::record_best_effort(
        state.repo.as_ref(),
        id,
        AccessAction::Logout,
        None,
        &client,
        Utc::now(),
    )
    .await;
    Json(MessageResponse::new("Logout realizado com sucesso"))
}

/// change_password
///
/// [Authenticated Route] Self-service password change. The current password must match.
#[utoipa::path(
    put,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Wrong current password or weak new password")
    )
)]
pub async fn change_password(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    check_password(&payload.new_password)?;

    let user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Usuário não encontrado".to_string()))?;

    if !auth::verify_password(payload.current_password, user.password_hash).await? {
        return Err(AppError::Validation("Senha atual incorreta".to_string()));
    }

    let password_hash = auth::hash_password(payload.new_password, state.config.bcrypt_cost).await?;
    state
        .repo
        .update_user(
            id,
            UserChanges {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;

    tracing::info!(user_id = %id, "password changed");
    Ok(Json(MessageResponse::new("Senha alterada com sucesso")))
}
