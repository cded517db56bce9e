//! RPC method handlers for WebSocket clients.

use std::sync::Arc;

use serde::Deserialize;

use quizroom_core::ids::{ChoiceId, GameId, JoinCode, ParticipantId, QuizId};
use quizroom_core::{GameError, Viewer};
use quizroom_engine::{GameOrchestrator, HostAction, QuizCatalog};
use quizroom_store::{StoreError, UserDirectory};

use crate::client::{Binding, Client};
use crate::rpc::{self, RpcResponse};

/// Longest display name a participant may pick.
pub const MAX_DISPLAY_NAME: usize = 32;

/// Shared state available to all RPC and HTTP handlers.
pub struct HandlerState {
    pub orchestrator: Arc<dyn GameOrchestrator>,
    pub catalog: Arc<QuizCatalog>,
    pub users: Arc<dyn UserDirectory>,
}

impl HandlerState {
    pub fn new(
        orchestrator: Arc<dyn GameOrchestrator>,
        catalog: Arc<QuizCatalog>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            orchestrator,
            catalog,
            users,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    quiz_id: QuizId,
}

#[derive(Debug, Deserialize)]
struct JoinParams {
    code: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RejoinParams {
    game_id: GameId,
    participant_id: ParticipantId,
    rejoin_secret: String,
}

#[derive(Debug, Deserialize)]
struct ReattachParams {
    game_id: GameId,
}

#[derive(Debug, Deserialize)]
struct AnswerParams {
    choice_id: ChoiceId,
}

#[derive(Debug, Deserialize)]
struct AdvanceParams {
    action: HostAction,
}

/// Dispatch an RPC method to the appropriate handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client: &Client,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Auth
        "auth.login" => auth_login(state, client, params, id).await,

        // Catalog
        "quiz.list" => quiz_list(state, id),

        // Game lifecycle
        "game.create" => game_create(state, client, params, id),
        "game.join" => game_join(state, client, params, id),
        "game.rejoin" => game_rejoin(state, client, params, id),
        "game.reattach" => game_reattach(state, client, params, id),
        "game.answer" => game_answer(state, client, params, id),
        "game.start" => game_advance(state, client, HostAction::Start, id),
        "game.close_question" | "game.closeQuestion" => {
            game_advance(state, client, HostAction::CloseQuestion, id)
        }
        "game.next_question" | "game.nextQuestion" => {
            game_advance(state, client, HostAction::NextQuestion, id)
        }
        "game.advance" => match rpc::parse_params::<AdvanceParams>(params) {
            Ok(p) => game_advance(state, client, p.action, id),
            Err(e) => RpcResponse::invalid_params(id, e),
        },
        "game.end" => game_end(state, client, id),
        "game.snapshot" => game_snapshot(state, client, id),

        // System
        "system.ping" => ping(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

/// Result of checking a username/password pair.
pub enum LoginOutcome {
    Authenticated(String),
    UnknownUser,
    BadPassword,
}

/// Check credentials on the blocking pool.
pub async fn check_login(
    users: &Arc<dyn UserDirectory>,
    username: String,
    password: String,
) -> Result<LoginOutcome, StoreError> {
    let users = Arc::clone(users);
    tokio::task::spawn_blocking(move || {
        let user = match users.find_by_username(&username) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Ok(LoginOutcome::UnknownUser),
            Err(e) => return Err(e),
        };
        if users.verify_password(&user, &password) {
            Ok(LoginOutcome::Authenticated(user.username))
        } else {
            Ok(LoginOutcome::BadPassword)
        }
    })
    .await
    .map_err(|e| StoreError::Hashing(e.to_string()))?
}

async fn auth_login(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: LoginParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match check_login(&state.users, p.username, p.password).await {
        Ok(LoginOutcome::Authenticated(username)) => {
            tracing::info!(client_id = %client.id(), %username, "Client authenticated");
            client.set_user(username.clone());
            RpcResponse::success(id, serde_json::json!({ "username": username }))
        }
        Ok(LoginOutcome::UnknownUser | LoginOutcome::BadPassword) => {
            RpcResponse::from_game_error(id, &GameError::Unauthorized)
        }
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn quiz_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match state.catalog.list() {
        Ok(quizzes) => {
            let items: Vec<serde_json::Value> = quizzes
                .iter()
                .map(|q| {
                    serde_json::json!({
                        "id": q.id,
                        "name": q.name,
                        "question_count": q.len(),
                    })
                })
                .collect();
            RpcResponse::success(id, serde_json::json!({ "quizzes": items }))
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

/// A connection plays in at most one game at a time.
fn ensure_unbound(client: &Client, id: &Option<serde_json::Value>) -> Result<(), RpcResponse> {
    match client.binding() {
        Some(binding) => Err(RpcResponse::invalid_request(
            id.clone(),
            format!("connection already attached to game {}", binding.game_id),
        )),
        None => Ok(()),
    }
}

fn require_binding(client: &Client) -> Result<Binding, GameError> {
    client
        .binding()
        .ok_or_else(|| GameError::NotFound("no game attached to this connection".into()))
}

fn game_create(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: CreateParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Err(resp) = ensure_unbound(client, &id) {
        return resp;
    }

    let user = client.user();
    match state
        .orchestrator
        .create_game(&p.quiz_id, user.as_deref(), client.connection().clone())
    {
        Ok(created) => {
            client.bind(created.game_id.clone(), Viewer::Host);
            RpcResponse::from_serializable(id, &created)
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_join(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: JoinParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let Some(code) = JoinCode::parse(&p.code) else {
        return RpcResponse::invalid_params(id, "code must not be empty");
    };
    let display_name = p.display_name.trim();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME {
        return RpcResponse::invalid_params(
            id,
            format!("display_name must be 1 to {MAX_DISPLAY_NAME} characters"),
        );
    }
    if let Err(resp) = ensure_unbound(client, &id) {
        return resp;
    }

    match state
        .orchestrator
        .join_game(&code, display_name, client.connection().clone())
    {
        Ok(joined) => {
            client.bind(
                joined.game_id.clone(),
                Viewer::Participant {
                    participant_id: joined.participant_id,
                },
            );
            RpcResponse::from_serializable(id, &joined)
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_rejoin(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: RejoinParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Err(resp) = ensure_unbound(client, &id) {
        return resp;
    }

    match state
        .orchestrator
        .rejoin_game(
            &p.game_id,
            p.participant_id,
            &p.rejoin_secret,
            client.connection().clone(),
        )
    {
        Ok(()) => {
            client.bind(
                p.game_id.clone(),
                Viewer::Participant {
                    participant_id: p.participant_id,
                },
            );
            RpcResponse::success(
                id,
                serde_json::json!({
                    "game_id": p.game_id,
                    "participant_id": p.participant_id,
                }),
            )
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_reattach(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: ReattachParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Err(resp) = ensure_unbound(client, &id) {
        return resp;
    }

    let user = client.user();
    match state
        .orchestrator
        .reattach_host(&p.game_id, user.as_deref(), client.connection().clone())
    {
        Ok(()) => {
            client.bind(p.game_id.clone(), Viewer::Host);
            RpcResponse::success(id, serde_json::json!({ "game_id": p.game_id }))
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_answer(
    state: &Arc<HandlerState>,
    client: &Client,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let p: AnswerParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let binding = match require_binding(client) {
        Ok(b) => b,
        Err(e) => return RpcResponse::from_game_error(id, &e),
    };
    let Viewer::Participant { participant_id } = binding.viewer else {
        return RpcResponse::from_game_error(id, &GameError::Unauthorized);
    };

    match state
        .orchestrator
        .submit_answer(&binding.game_id, participant_id, &p.choice_id)
    {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "accepted": true })),
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_advance(
    state: &Arc<HandlerState>,
    client: &Client,
    action: HostAction,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let binding = match require_binding(client) {
        Ok(b) => b,
        Err(e) => return RpcResponse::from_game_error(id, &e),
    };

    match state
        .orchestrator
        .host_advance(&binding.game_id, client.id(), action)
    {
        Ok(phase) => RpcResponse::success(id, serde_json::json!({ "phase": phase })),
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_end(
    state: &Arc<HandlerState>,
    client: &Client,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let binding = match require_binding(client) {
        Ok(b) => b,
        Err(e) => return RpcResponse::from_game_error(id, &e),
    };

    match state.orchestrator.end_game(&binding.game_id, client.id()) {
        Ok(()) => {
            client.clear_binding();
            RpcResponse::success(id, serde_json::json!({ "ended": true }))
        }
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn game_snapshot(
    state: &Arc<HandlerState>,
    client: &Client,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let binding = match require_binding(client) {
        Ok(b) => b,
        Err(e) => return RpcResponse::from_game_error(id, &e),
    };

    match state.orchestrator.snapshot(&binding.game_id, client.id()) {
        Ok(snapshot) => RpcResponse::from_serializable(id, &snapshot),
        Err(e) => RpcResponse::from_game_error(id, &e),
    }
}

fn ping(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "pong": true,
            "games": state.orchestrator.active_games(),
        }),
    )
}
