//! Plain HTTP endpoints: catalog authoring, join-code lookup, accounts.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use quizroom_core::ids::{JoinCode, QuizId};
use quizroom_core::{GameError, QuizQuestion};
use quizroom_engine::{ConnectionHandle, GameOrchestrator};
use quizroom_store::{NewUser, StoreError};

use crate::handlers::{check_login, LoginOutcome};
use crate::server::AppState;

/// An HTTP error rendered as `{ error: { code, message } }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        let status = match &e {
            GameError::Validation(_) => StatusCode::BAD_REQUEST,
            GameError::NotFound(_)
            | GameError::UnknownParticipant(_)
            | GameError::UnknownChoice(_) => StatusCode::NOT_FOUND,
            GameError::Unauthorized => StatusCode::UNAUTHORIZED,
            GameError::InvalidState { .. }
            | GameError::AlreadyAnswered
            | GameError::SessionFull { .. } => StatusCode::CONFLICT,
            GameError::CodesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GameError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::new(StatusCode::CONFLICT, "CONFLICT", msg),
            other => GameError::from(other).into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "Request failed");
        }
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "games": state.handler_state.orchestrator.active_games(),
        "clients": state.client_registry.count(),
    }))
}

/// Full templates, correct flags included: this is the authoring view.
pub async fn list_quizzes(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.handler_state.catalog.list()?))
}

#[derive(Debug, Deserialize)]
pub struct CreateQuiz {
    name: String,
    questions: Vec<QuizQuestion>,
}

pub async fn create_quiz(
    State(state): State<AppState>,
    Json(body): Json<CreateQuiz>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let catalog = &state.handler_state.catalog;
    let id = catalog.create(name, body.questions)?;
    let quiz = catalog.get(&id)?;
    Ok((StatusCode::CREATED, Json((*quiz).clone())))
}

/// Open a new game on a quiz without holding a socket yet. The host seat
/// starts vacant; the host claims it with `game.reattach` over `/ws` before
/// the host grace period runs out.
pub async fn host_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<QuizId>,
    Json(body): Json<Login>,
) -> Result<impl IntoResponse, ApiError> {
    let username = match check_login(&state.handler_state.users, body.username, body.password)
        .await?
    {
        LoginOutcome::Authenticated(username) => username,
        LoginOutcome::UnknownUser | LoginOutcome::BadPassword => {
            return Err(GameError::Unauthorized.into());
        }
    };

    let orchestrator = &state.handler_state.orchestrator;
    let (connection, _events) = ConnectionHandle::channel(1);
    let created = orchestrator.create_game(&quiz_id, Some(&username), connection.clone())?;
    orchestrator.disconnect(&created.game_id, connection.id());

    tracing::info!(game_id = %created.game_id, %username, "Game opened over HTTP");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    code: Option<String>,
}

/// Resolve a join code to the game behind it.
pub async fn lookup_join_code(
    State(state): State<AppState>,
    Query(query): Query<JoinQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let code = query
        .code
        .as_deref()
        .and_then(JoinCode::parse)
        .ok_or_else(|| ApiError::bad_request("code is required"))?;
    let summary = state.handler_state.orchestrator.lookup(&code)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct Register {
    username: String,
    password: String,
    confirm: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Register>,
) -> Result<impl IntoResponse, ApiError> {
    let username = body.username.trim().to_string();
    if username.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }
    if body.password != body.confirm {
        return Err(ApiError::bad_request("passwords do not match"));
    }

    let users = std::sync::Arc::clone(&state.handler_state.users);
    let password = body.password;
    let created = tokio::task::spawn_blocking(move || {
        users.create(NewUser { username, password })
    })
    .await
    .map_err(|e| GameError::Storage(e.to_string()))?;

    let user = match created {
        Ok(user) => user,
        Err(StoreError::Conflict(_)) => {
            return Err(ApiError::bad_request("username already taken"));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
pub struct Login {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Login>,
) -> Result<impl IntoResponse, ApiError> {
    match check_login(&state.handler_state.users, body.username, body.password).await? {
        LoginOutcome::Authenticated(username) => {
            Ok(Json(serde_json::json!({ "username": username })))
        }
        LoginOutcome::UnknownUser => Err(ApiError::bad_request("unknown user")),
        LoginOutcome::BadPassword => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            GameError::Unauthorized.code(),
            "wrong password",
        )),
    }
}
