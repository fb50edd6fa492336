#![allow(dead_code)]

pub mod memory;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use hub_maximiza::{
    AppConfig, AppState, auth,
    models::{Municipality, NewSolution, NewUser, Role, Solution, UserRecord},
    repository::{Repository, RepositoryState},
};
use serde_json::Value;
use uuid::Uuid;

pub use memory::InMemoryRepository;

pub const PASSWORD: &str = "senha123";

// --- State ---

/// A fresh in-memory store wired into an `AppState` with test configuration.
/// The concrete handle is returned too so tests can seed and inspect it directly.
pub fn test_state() -> (AppState, Arc<InMemoryRepository>) {
    test_state_with(AppConfig::default())
}

pub fn test_state_with(config: AppConfig) -> (AppState, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new());
    let state = AppState::new(repo.clone() as RepositoryState, config);
    (state, repo)
}

// --- Seeding ---

pub async fn seed_user(
    repo: &dyn Repository,
    name: &str,
    email: &str,
    role: Role,
    municipality_id: Option<Uuid>,
) -> UserRecord {
    let password_hash = auth::hash_password(PASSWORD.to_string(), 10).await.unwrap();
    repo.create_user(NewUser {
        name: name.to_string(),
        email: email.to_string(),
        password_hash,
        role,
        municipality_id,
    })
    .await
    .unwrap()
}

pub async fn seed_admin(repo: &dyn Repository) -> UserRecord {
    seed_user(repo, "Administrador", "admin@hubmaximiza.com", Role::Admin, None).await
}

pub async fn seed_municipality(repo: &dyn Repository, name: &str, state: &str) -> Municipality {
    repo.create_municipality(name, state).await.unwrap()
}

pub async fn seed_solution(repo: &dyn Repository, name: &str) -> Solution {
    repo.create_solution(NewSolution {
        name: name.to_string(),
        description: Some(format!("Solução {name}")),
        icon: None,
        color: Some("#00a9e8".to_string()),
    })
    .await
    .unwrap()
}

pub fn token_for(state: &AppState, user: &UserRecord) -> String {
    auth::issue_token(&state.config, user).unwrap()
}

// --- Response helpers ---

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Renders a handler error the way axum would and returns status plus JSON body.
pub async fn error_parts(error: impl IntoResponse) -> (StatusCode, Value) {
    let response = error.into_response();
    let status = response.status();
    (status, body_json(response).await)
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}
