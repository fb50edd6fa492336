use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use super::{optional_text, required};
use crate::{
    AppState,
    access_log::{self, ClientInfo},
    auth::{AdminUser, AuthUser},
    error::AppError,
    models::{
        AccessAction, CreateSolutionRequest, MessageResponse, NewSolution, SolutionChanges,
        SolutionMutationResponse, SolutionOverview, UpdateSolutionRequest, is_hex_color,
    },
    repository::SOLUTION_IN_USE_MESSAGE,
};

fn not_found() -> AppError {
    AppError::NotFound("Solução não encontrada".to_string())
}

fn denied() -> AppError {
    AppError::Forbidden("Acesso negado a esta solução".to_string())
}

fn duplicate() -> AppError {
    AppError::Conflict("Esta solução já está cadastrada".to_string())
}

fn parse_color(raw: Option<String>) -> Result<Option<String>, AppError> {
    match optional_text(raw) {
        Some(color) if !is_hex_color(&color) => Err(AppError::Validation(
            "Cor deve estar no formato #RRGGBB".to_string(),
        )),
        color => Ok(color),
    }
}

/// list_solutions
///
/// [Authenticated Route] Admins get the full catalogue; regular users get their active
/// grants only.
#[utoipa::path(
    get,
    path = "/solutions",
    responses((status = 200, description = "Solutions", body = [SolutionOverview]))
)]
pub async fn list_solutions(
    caller: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<SolutionOverview>>, AppError> {
    let granted_to = (!caller.is_admin()).then_some(caller.id);
    let solutions = state.repo.list_solutions(granted_to).await?;
    Ok(Json(solutions))
}

#[utoipa::path(
    get,
    path = "/solutions/{id}",
    params(("id" = Uuid, Path, description = "Solution ID")),
    responses(
        (status = 200, description = "Solution", body = SolutionOverview),
        (status = 403, description = "No grant for this solution"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_solution(
    caller: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SolutionOverview>, AppError> {
    if !caller.is_admin() && !state.repo.has_grant(caller.id, id).await? {
        return Err(denied());
    }

    let solution = state.repo.find_solution(id).await?.ok_or_else(not_found)?;
    Ok(Json(solution))
}

#[utoipa::path(
    post,
    path = "/solutions",
    request_body = CreateSolutionRequest,
    responses(
        (status = 201, description = "Created", body = SolutionMutationResponse),
        (status = 400, description = "Validation failure or duplicate name")
    )
)]
pub async fn create_solution(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateSolutionRequest>,
) -> Result<(StatusCode, Json<SolutionMutationResponse>), AppError> {
    let name = required(&payload.name, "Nome é obrigatório")?;
    let color = parse_color(payload.color)?;

    if state.repo.solution_name_taken(&name, None).await? {
        return Err(duplicate());
    }

    let solution = state
        .repo
        .create_solution(NewSolution {
            name,
            description: optional_text(payload.description),
            icon: optional_text(payload.icon),
            color,
        })
        .await?;
    tracing::info!(solution_id = %solution.id, "solution created");

    Ok((
        StatusCode::CREATED,
        Json(SolutionMutationResponse {
            message: "Solução criada com sucesso".to_string(),
            solution,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/solutions/{id}",
    params(("id" = Uuid, Path, description = "Solution ID")),
    request_body = UpdateSolutionRequest,
    responses(
        (status = 200, description = "Updated", body = SolutionMutationResponse),
        (status = 400, description = "Validation failure or duplicate name"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_solution(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSolutionRequest>,
) -> Result<Json<SolutionMutationResponse>, AppError> {
    if state.repo.find_solution(id).await?.is_none() {
        return Err(not_found());
    }

    let name = payload
        .name
        .as_deref()
        .map(|name| required(name, "Nome é obrigatório"))
        .transpose()?;
    if let Some(name) = name.as_deref() {
        if state.repo.solution_name_taken(name, Some(id)).await? {
            return Err(duplicate());
        }
    }

    let changes = SolutionChanges {
        name,
        description: optional_text(payload.description),
        icon: optional_text(payload.icon),
        color: parse_color(payload.color)?,
        active: payload.active,
    };

    let solution = state
        .repo
        .update_solution(id, changes)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(SolutionMutationResponse {
        message: "Solução atualizada com sucesso".to_string(),
        solution,
    }))
}

/// delete_solution
///
/// [Admin Route] Refused while any user holds a grant for it. Past access-log rows keep
/// their history with the solution reference cleared.
#[utoipa::path(
    delete,
    path = "/solutions/{id}",
    params(("id" = Uuid, Path, description = "Solution ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 400, description = "Solution still granted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_solution(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if state.repo.count_solution_grants(id).await? > 0 {
        return Err(AppError::Conflict(SOLUTION_IN_USE_MESSAGE.to_string()));
    }

    if !state.repo.delete_solution(id).await? {
        return Err(not_found());
    }

    tracing::info!(solution_id = %id, "solution deleted");
    Ok(Json(MessageResponse::new("Solução deletada com sucesso")))
}

/// access_solution
///
/// [Authenticated Route] Records that the caller opened a solution. The log write is the
/// whole operation, so unlike login its failure is surfaced.
#[utoipa::path(
    post,
    path = "/solutions/{id}/access",
    params(("id" = Uuid, Path, description = "Solution ID")),
    responses(
        (status = 200, description = "Access recorded", body = MessageResponse),
        (status = 403, description = "No grant for this solution"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn access_solution(
    caller: AuthUser,
    State(state): State<AppState>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if state.repo.find_solution(id).await?.is_none() {
        return Err(not_found());
    }
    if !caller.is_admin() && !state.repo.has_grant(caller.id, id).await? {
        return Err(denied());
    }

    let now = Utc::now();
    access_log::record(
        state.repo.as_ref(),
        caller.id,
        AccessAction::AccessSolution,
        Some(id),
        &client,
        now,
    )
    .await?;
    if let Err(e) = state.repo.touch_session(caller.id, now).await {
        tracing::warn!(error = ?e, user_id = %caller.id, "failed to refresh session");
    }

    Ok(Json(MessageResponse::new("Acesso registrado com sucesso")))
}
