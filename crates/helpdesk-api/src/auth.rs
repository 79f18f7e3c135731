use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, Expiration, SameSite};
use chrono::Utc;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use helpdesk_db::Database;
use helpdesk_types::api::{LoginRequest, LoginResponse, MeResponse, RefreshResponse, TokenKind};
use helpdesk_types::{Identity, Role};

use crate::blocking;
use crate::config::CookieConfig;
use crate::error::ApiError;
use crate::lifecycle::TicketEngine;
use crate::password::verify_password;
use crate::tokens::TokenService;
use crate::views;

pub const REFRESH_COOKIE: &str = "refresh_token";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: TokenService,
    pub tickets: TicketEngine,
    pub cookie: CookieConfig,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, tokens: TokenService, cookie: CookieConfig) -> AppState {
        Arc::new(Self {
            tickets: TicketEngine::new(db.clone()),
            db,
            tokens,
            cookie,
        })
    }
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::InvalidInput("invalid request body"))?;
    let login = req.login.trim().to_string();
    if login.is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidInput("login and password are required"));
    }

    let db = state.db.clone();
    let lookup = login.clone();
    let user = blocking(move || {
        let Some(user) = db.get_user_by_login(&lookup)? else {
            return Ok(None);
        };
        let matches = verify_password(&req.password, &user.password_hash)?;
        Ok(matches.then_some(user))
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login for '{}'", login);
        return Err(ApiError::Unauthenticated);
    };

    let profile = views::user_profile(user)?;
    let access = state.tokens.issue(TokenKind::Access, profile.id, profile.role)?;
    let refresh = state.tokens.issue(TokenKind::Refresh, profile.id, profile.role)?;

    info!(
        "User {} ({}) logged in, session valid until {}",
        profile.username,
        profile.role,
        refresh.expires_at()
    );

    let jar = jar.add(refresh_cookie(&state, refresh.token));
    Ok((
        jar,
        Json(LoginResponse {
            access_token: access.token,
            user: profile,
        }),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<RefreshResponse>, ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthenticated)?;

    let claims = state
        .tokens
        .verify(&token, TokenKind::Refresh)
        .inspect_err(|e| debug!("Rejected refresh token: {}", e))?;

    let db = state.db.clone();
    let jti = claims.jti.to_string();
    if blocking(move || Ok(db.is_token_revoked(&jti)?)).await? {
        debug!("Refresh token {} was revoked", claims.jti);
        return Err(ApiError::Unauthenticated);
    }

    let access = state.tokens.issue(TokenKind::Access, claims.uid, claims.role)?;
    Ok(Json(RefreshResponse {
        access_token: access.token,
    }))
}

/// Always clears the cookie. A still-valid refresh token is also revoked.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let claims = jar
        .get(REFRESH_COOKIE)
        .and_then(|c| state.tokens.verify(c.value(), TokenKind::Refresh).ok());

    if let Some(claims) = claims {
        let db = state.db.clone();
        let jti = claims.jti.to_string();
        blocking(move || Ok(db.revoke_token(&jti, claims.exp, Utc::now().timestamp())?)).await?;
        info!("User {} logged out", claims.uid);
    }

    let jar = jar.add(cleared_cookie(&state.cookie));
    Ok((jar, Json(json!({ "ok": true }))))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MeResponse>, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || Ok(db.get_user_by_id(identity.user_id)?))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(MeResponse {
        user: views::user_profile(user)?,
    }))
}

fn refresh_cookie(state: &AppStateInner, token: String) -> Cookie<'static> {
    let max_age = state.tokens.ttl(TokenKind::Refresh).num_seconds();
    session_cookie(&state.cookie, token, time::Duration::seconds(max_age))
}

/// Browsers only drop a cookie when attributes match, so the clearing cookie
/// carries the same path, domain and flags as the one set at login.
fn cleared_cookie(config: &CookieConfig) -> Cookie<'static> {
    let mut cookie = session_cookie(config, String::new(), time::Duration::ZERO);
    cookie.set_expires(Expiration::DateTime(OffsetDateTime::UNIX_EPOCH));
    cookie
}

fn session_cookie(config: &CookieConfig, value: String, max_age: time::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, value);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Strict);
    cookie.set_secure(config.secure);
    cookie.set_max_age(max_age);
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Gate an operation on the caller's role.
pub(crate) fn require_role(identity: &Identity, role: Role) -> Result<(), ApiError> {
    if identity.is(role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
