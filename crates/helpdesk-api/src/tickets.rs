use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use helpdesk_types::Identity;
use helpdesk_types::api::{
    AddMessageRequest, AssignTicketRequest, CreateTicketRequest, MessageListResponse,
    ReplyTicketRequest, TicketListResponse, TicketQuery, TicketResponse,
};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

// Extractor rejections are folded into `ApiError` so every failure has a JSON body.

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|_| ApiError::InvalidInput("invalid request body"))
}

fn ticket_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::InvalidInput("bad ticket id"))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    payload: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let ticket = blocking(move || {
        state
            .tickets
            .create(&who, &req.title, &req.description, &req.priority)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(TicketResponse { ticket })))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    query: Result<Query<TicketQuery>, QueryRejection>,
) -> Result<Json<TicketListResponse>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::InvalidInput("invalid query"))?;
    let tickets = blocking(move || state.tickets.list(&who, &query.tab, &query.q)).await?;
    Ok(Json(TicketListResponse { tickets }))
}

pub async fn list_my_tickets(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
) -> Result<Json<TicketListResponse>, ApiError> {
    let tickets = blocking(move || state.tickets.list_mine(&who)).await?;
    Ok(Json(TicketListResponse { tickets }))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = ticket_id(path)?;
    let ticket = blocking(move || state.tickets.get(&who, id)).await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn get_my_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = ticket_id(path)?;
    let ticket = blocking(move || state.tickets.get_mine(&who, id)).await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AssignTicketRequest>, JsonRejection>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = ticket_id(path)?;
    let req = body(payload)?;
    let ticket = blocking(move || state.tickets.assign(&who, id, req.assignee_id)).await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn reply_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReplyTicketRequest>, JsonRejection>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = ticket_id(path)?;
    let req = body(payload)?;
    let ticket = blocking(move || {
        state
            .tickets
            .save_support_reply(&who, id, req.assignee_id, &req.reply)
    })
    .await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn close_ticket(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = ticket_id(path)?;
    let ticket = blocking(move || state.tickets.close(&who, id)).await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn add_message(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AddMessageRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let id = ticket_id(path)?;
    let req = body(payload)?;
    blocking(move || state.tickets.add_message(&who, id, &req.message)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_my_message(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AddMessageRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let id = ticket_id(path)?;
    let req = body(payload)?;
    blocking(move || state.tickets.add_requester_message(&who, id, &req.message)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let id = ticket_id(path)?;
    let messages = blocking(move || state.tickets.list_messages(&who, id)).await?;
    Ok(Json(MessageListResponse { messages }))
}

pub async fn list_my_messages(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let id = ticket_id(path)?;
    let messages = blocking(move || state.tickets.list_requester_messages(&who, id)).await?;
    Ok(Json(MessageListResponse { messages }))
}
