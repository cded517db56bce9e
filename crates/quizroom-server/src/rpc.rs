use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use quizroom_core::GameError;

/// JSON-RPC style request frame sent by clients over the WebSocket.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response frame: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

// Protocol-level error codes. Game errors carry their own codes.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Serialize a result, falling back to an internal error.
    pub fn from_serializable<T: Serialize>(id: Option<serde_json::Value>, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => Self::success(id, result),
            Err(e) => Self::internal_error(id, e.to_string()),
        }
    }

    pub fn from_game_error(id: Option<serde_json::Value>, err: &GameError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn invalid_request(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }
}

/// Decode the params object into a typed command.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, String> {
    serde_json::from_value(params.clone()).map_err(|e| format!("Invalid params: {e}"))
}
