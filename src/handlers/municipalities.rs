use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{optional_text, required};
use crate::{
    AppState,
    auth::{AdminUser, AuthUser},
    error::AppError,
    models::{
        CreateMunicipalityRequest, MessageResponse, MunicipalityMutationResponse,
        MunicipalityOverview, UpdateMunicipalityRequest, normalize_state,
    },
    repository::MUNICIPALITY_IN_USE_MESSAGE,
};

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct MunicipalityFilter {
    /// Case-insensitive match over name and state.
    pub search: Option<String>,
}

fn not_found() -> AppError {
    AppError::NotFound("Município não encontrado".to_string())
}

fn duplicate() -> AppError {
    AppError::Conflict("Este município já está cadastrado".to_string())
}

fn parse_state(raw: &str) -> Result<String, AppError> {
    normalize_state(raw)
        .ok_or_else(|| AppError::Validation("Estado deve ter 2 letras".to_string()))
}

#[utoipa::path(
    get,
    path = "/municipalities",
    params(MunicipalityFilter),
    responses((status = 200, description = "Municipalities", body = [MunicipalityOverview]))
)]
pub async fn list_municipalities(
    _user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<MunicipalityFilter>,
) -> Result<Json<Vec<MunicipalityOverview>>, AppError> {
    let rows = state
        .repo
        .list_municipalities(optional_text(filter.search))
        .await?;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/municipalities/{id}",
    params(("id" = Uuid, Path, description = "Municipality ID")),
    responses(
        (status = 200, description = "Municipality", body = MunicipalityOverview),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_municipality(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MunicipalityOverview>, AppError> {
    let municipality = state
        .repo
        .find_municipality(id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(municipality))
}

/// create_municipality
///
/// [Admin Route] `state` is stored upper-cased; `(name, state)` must be unique ignoring
/// the case of the name.
#[utoipa::path(
    post,
    path = "/municipalities",
    request_body = CreateMunicipalityRequest,
    responses(
        (status = 201, description = "Created", body = MunicipalityMutationResponse),
        (status = 400, description = "Validation failure or duplicate")
    )
)]
pub async fn create_municipality(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateMunicipalityRequest>,
) -> Result<(StatusCode, Json<MunicipalityMutationResponse>), AppError> {
    let name = required(&payload.name, "Nome é obrigatório")?;
    let uf = parse_state(&payload.state)?;

    if state.repo.municipality_exists(&name, &uf, None).await? {
        return Err(duplicate());
    }

    let municipality = state.repo.create_municipality(&name, &uf).await?;
    tracing::info!(municipality_id = %municipality.id, "municipality created");

    Ok((
        StatusCode::CREATED,
        Json(MunicipalityMutationResponse {
            message: "Município criado com sucesso".to_string(),
            municipality,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/municipalities/{id}",
    params(("id" = Uuid, Path, description = "Municipality ID")),
    request_body = UpdateMunicipalityRequest,
    responses(
        (status = 200, description = "Updated", body = MunicipalityMutationResponse),
        (status = 400, description = "Validation failure or duplicate"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_municipality(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMunicipalityRequest>,
) -> Result<Json<MunicipalityMutationResponse>, AppError> {
    let current = state
        .repo
        .find_municipality(id)
        .await?
        .ok_or_else(not_found)?;

    let name = payload
        .name
        .as_deref()
        .map(|name| required(name, "Nome é obrigatório"))
        .transpose()?;
    let uf = payload.state.as_deref().map(parse_state).transpose()?;

    let effective_name = name.as_deref().unwrap_or(&current.name);
    let effective_state = uf.as_deref().unwrap_or(&current.state);
    if state
        .repo
        .municipality_exists(effective_name, effective_state, Some(id))
        .await?
    {
        return Err(duplicate());
    }

    let municipality = state
        .repo
        .update_municipality(id, name, uf)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(MunicipalityMutationResponse {
        message: "Município atualizado com sucesso".to_string(),
        municipality,
    }))
}

/// delete_municipality
///
/// [Admin Route] Refused while any user belongs to the municipality.
#[utoipa::path(
    delete,
    path = "/municipalities/{id}",
    params(("id" = Uuid, Path, description = "Municipality ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 400, description = "Municipality still has users"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_municipality(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if state.repo.count_municipality_users(id).await? > 0 {
        return Err(AppError::Conflict(MUNICIPALITY_IN_USE_MESSAGE.to_string()));
    }

    if !state.repo.delete_municipality(id).await? {
        return Err(not_found());
    }

    tracing::info!(municipality_id = %id, "municipality deleted");
    Ok(Json(MessageResponse::new("Município deletado com sucesso")))
}
