use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed{}: {reason}", .item_id.map(|id| format!(" for item {id}")).unwrap_or_default())]
    Validation { item_id: Option<Uuid>, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{service} unavailable: {message}")]
    TransientDependency { service: &'static str, message: String },

    /// A guarded write lost against a concurrent one.
    #[error("{entity} {id} was modified concurrently")]
    ConcurrencyConflict { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            item_id: None,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TransientDependency { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<shared::DecisionViolation> for EngineError {
    fn from(v: shared::DecisionViolation) -> Self {
        Self::Validation {
            item_id: v.item_id,
            reason: v.reason,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
