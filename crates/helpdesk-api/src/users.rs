use axum::{Extension, Json, extract::State};

use helpdesk_types::api::SupportUsersResponse;
use helpdesk_types::{Identity, Role};

use crate::auth::{AppState, require_role};
use crate::blocking;
use crate::error::ApiError;
use crate::views;

/// Candidates for the assignee picker.
pub async fn list_support_users(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
) -> Result<Json<SupportUsersResponse>, ApiError> {
    require_role(&who, Role::Support)?;
    let db = state.db.clone();
    let rows = blocking(move || Ok(db.list_support_users()?)).await?;
    Ok(Json(SupportUsersResponse {
        users: rows.into_iter().map(views::support_user).collect(),
    }))
}
