use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::tokens::TokenError;

/// Every failure a handler can return, mapped one-to-one onto a status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("not found")]
    NotFound,
    #[error("conflict, retry the request")]
    Conflict,
    /// Persistence or other internal failure. Logged, never shown to the caller.
    #[error("store error: {0}")]
    Store(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<helpdesk_db::Conflict>().is_some() {
            return Self::Conflict;
        }
        Self::Store(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => Self::Store(anyhow::Error::new(e)),
            TokenError::ExpiryOverflow => Self::Store(anyhow::Error::new(TokenError::ExpiryOverflow)),
            TokenError::Invalid | TokenError::Expired => Self::Unauthenticated,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Store(anyhow::anyhow!("spawn_blocking join error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Store(err) => {
                error!("{:#}", err);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
