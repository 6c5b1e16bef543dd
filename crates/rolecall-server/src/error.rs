use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use rolecall_core::room::RoomError;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    /// Structured validation failure with one reason per problem.
    Unprocessable { message: String, details: Vec<String> },
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::Conflict(m)
            | Self::Internal(m) => write!(f, "{m}"),
            Self::Unprocessable { message, .. } => write!(f, "{message}"),
        }
    }
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        let message = err.to_string();
        match err {
            RoomError::NotFound(_) => Self::NotFound(message),
            RoomError::PlayerNotFound => Self::Unauthorized(message),
            RoomError::NotHost => Self::Forbidden(message),
            RoomError::NotInLobby(_) | RoomError::InvalidTransition { .. } | RoomError::RoomFull => {
                Self::Conflict(message)
            },
            RoomError::StartBlocked(details) => Self::Unprocessable {
                message: "Game cannot start yet".to_string(),
                details,
            },
            RoomError::Validation(_) => Self::Unprocessable {
                message,
                details: Vec::new(),
            },
            RoomError::InvalidName => Self::BadRequest(message),
            RoomError::CodeSpaceExhausted => Self::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": m })),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": m })),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, serde_json::json!({ "error": m })),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, serde_json::json!({ "error": m })),
            Self::Conflict(m) => (StatusCode::CONFLICT, serde_json::json!({ "error": m })),
            Self::Unprocessable { message, details } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": message, "details": details }),
            ),
            Self::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": m }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
