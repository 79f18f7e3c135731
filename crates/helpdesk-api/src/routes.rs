use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{tickets, users};

/// All application routes. `/auth/login`, `/auth/refresh` and `/auth/logout`
/// are public; everything else sits behind the bearer-token check.
/// Transport layers (CORS, tracing, timeouts) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout));

    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/tickets", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/tickets/my", get(tickets::list_my_tickets))
        .route("/tickets/my/{id}", get(tickets::get_my_ticket))
        .route(
            "/tickets/my/{id}/messages",
            get(tickets::list_my_messages).post(tickets::add_my_message),
        )
        .route("/tickets/{id}", get(tickets::get_ticket))
        .route("/tickets/{id}/assign", post(tickets::assign_ticket))
        .route(
            "/tickets/{id}/messages",
            get(tickets::list_messages).post(tickets::add_message),
        )
        .route("/tickets/{id}/reply", post(tickets::reply_ticket))
        .route("/tickets/{id}/close", post(tickets::close_ticket))
        .route("/users/support", get(users::list_support_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}
