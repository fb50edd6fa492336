use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{check_password, optional_text, required};
use crate::{
    AppState,
    auth::{self, AdminUser, AuthUser},
    error::AppError,
    models::{
        MessageResponse, ReplaceGrantsRequest, Role, User, UserChanges, UserDetail,
        UserMutationResponse, UserSummary, UpdateUserRequest, is_valid_email, normalize_email,
    },
    repository::USER_HAS_HISTORY_MESSAGE,
};

/// UserFilter
///
/// Query parameters of GET /users.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct UserFilter {
    /// Only users of this municipality.
    pub municipality_id: Option<Uuid>,
    /// Case-insensitive match over name and email.
    pub search: Option<String>,
}

fn user_not_found() -> AppError {
    AppError::NotFound("Usuário não encontrado".to_string())
}

/// list_users
///
/// [Admin Route] Every account, newest first, with the ids of its active grants.
#[utoipa::path(
    get,
    path = "/users",
    params(UserFilter),
    responses((status = 200, description = "Users", body = [UserSummary]))
)]
pub async fn list_users(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    let users = state
        .repo
        .list_users(filter.municipality_id, optional_text(filter.search))
        .await?;
    Ok(Json(users))
}

/// get_user
///
/// [Authenticated Route] Admins read any account; regular users only their own.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with every granted solution", body = UserDetail),
        (status = 403, description = "Not the caller's own account"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    caller: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDetail>, AppError> {
    if !caller.is_admin() && caller.id != id {
        return Err(AppError::Forbidden("Acesso negado".to_string()));
    }

    let user = state.repo.find_user(id).await?.ok_or_else(user_not_found)?;
    let solutions = state.repo.granted_solutions(id, false).await?;

    Ok(Json(UserDetail {
        user: User::from(user),
        solutions,
    }))
}

/// update_user
///
/// [Admin Route] Partial update; only the fields present in the body change.
#[utoipa::path(
    put,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserMutationResponse),
        (status = 400, description = "Validation failure or email in use"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserMutationResponse>, AppError> {
    if state.repo.find_user(id).await?.is_none() {
        return Err(user_not_found());
    }

    let mut changes = UserChanges::default();

    if let Some(name) = payload.name {
        changes.name = Some(required(&name, "Nome é obrigatório")?);
    }

    if let Some(email) = payload.email {
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Email inválido".to_string()));
        }
        if state.repo.email_in_use(&email, Some(id)).await? {
            return Err(AppError::Conflict("Este email já está em uso".to_string()));
        }
        changes.email = Some(email);
    }

    if let Some(role) = payload.role {
        let role: Role = role
            .trim()
            .parse()
            .map_err(|_| AppError::Validation("Perfil deve ser 'admin' ou 'user'".to_string()))?;
        changes.role = Some(role);
    }

    if let Some(municipality_id) = payload.municipality_id {
        if state.repo.find_municipality(municipality_id).await?.is_none() {
            return Err(AppError::Validation("Município não encontrado".to_string()));
        }
        changes.municipality_id = Some(municipality_id);
    }

    changes.active = payload.active;

    if let Some(password) = payload.password {
        check_password(&password)?;
        changes.password_hash =
            Some(auth::hash_password(password, state.config.bcrypt_cost).await?);
    }

    let user = state
        .repo
        .update_user(id, changes)
        .await?
        .ok_or_else(user_not_found)?;

    Ok(Json(UserMutationResponse {
        message: "Usuário atualizado com sucesso".to_string(),
        user: User::from(user),
    }))
}

/// delete_user
///
/// [Admin Route] Removes an account together with its grants and sessions.
///
/// Refused for the caller's own account, and for any account with access history: the
/// audit trail is never destroyed, such accounts should be deactivated instead.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 400, description = "Own account, or account has access history"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if admin.id == id {
        return Err(AppError::Validation(
            "Você não pode deletar sua própria conta".to_string(),
        ));
    }

    if state.repo.find_user(id).await?.is_none() {
        return Err(user_not_found());
    }

    if state.repo.count_user_access_logs(id).await? > 0 {
        return Err(AppError::Conflict(USER_HAS_HISTORY_MESSAGE.to_string()));
    }

    if !state.repo.delete_user(id).await? {
        return Err(user_not_found());
    }

    tracing::info!(user_id = %id, deleted_by = %admin.id, "user deleted");
    Ok(Json(MessageResponse::new("Usuário deletado com sucesso")))
}

/// replace_user_solutions
///
/// [Admin Route] Replaces the whole grant set of a regular user in one transaction. An
/// unknown solution id anywhere in the list leaves the previous set untouched.
#[utoipa::path(
    put,
    path = "/users/{id}/solutions",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ReplaceGrantsRequest,
    responses(
        (status = 200, description = "Grants replaced", body = MessageResponse),
        (status = 400, description = "Target is an admin, or unknown solution in list"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn replace_user_solutions(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceGrantsRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = state.repo.find_user(id).await?.ok_or_else(user_not_found)?;
    if user.role.is_admin() {
        return Err(AppError::Validation(
            "Administradores têm acesso a todas as soluções".to_string(),
        ));
    }

    state.repo.replace_grants(id, &payload.solution_ids).await?;

    tracing::info!(user_id = %id, grants = payload.solution_ids.len(), "grant set replaced");
    Ok(Json(MessageResponse::new("Soluções atualizadas com sucesso")))
}
