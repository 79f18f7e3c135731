use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use helpdesk_types::Identity;
use helpdesk_types::api::TokenKind;

use crate::auth::AppState;
use crate::error::ApiError;

/// Verify the bearer access token and attach the caller's [`Identity`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = {
        let token = bearer_token(req.headers()).ok_or(ApiError::Unauthenticated)?;
        let claims = state
            .tokens
            .verify(token, TokenKind::Access)
            .inspect_err(|e| debug!("Rejected access token: {}", e))?;
        Identity::new(claims.uid, claims.role)
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
