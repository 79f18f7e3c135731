//! Database row types. Timestamps stay as the stored text; the API layer
//! parses them.

use helpdesk_types::{Priority, Role, TicketStatus};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub dept_id: Option<i64>,
    pub dept_name: Option<String>,
    pub role: String,
}

pub struct SupportUserRow {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub struct TicketRow {
    pub id: i64,
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub user_id: i64,
    pub requester_first: Option<String>,
    pub requester_last: Option<String>,
    pub dept_name: Option<String>,
    pub requester_phone: Option<String>,
    pub taken_by: Option<i64>,
    pub assignee_first: Option<String>,
    pub assignee_last: Option<String>,
    pub support_reply: Option<String>,
    pub replied_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
}

pub struct TicketListRow {
    pub id: i64,
    pub ticket_number: String,
    pub title: String,
    pub created_at: String,
    pub priority: String,
    pub status: String,
    pub assignee_first: Option<String>,
    pub assignee_last: Option<String>,
}

pub struct MessageRow {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub author_first: Option<String>,
    pub author_last: Option<String>,
    pub message: String,
    pub created_at: String,
}

// -- Inputs --

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub phone: Option<&'a str>,
    /// Resolved by name; an unknown department leaves the user without one.
    pub dept_name: Option<&'a str>,
    pub role: Role,
}

pub struct NewTicket<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub priority: Priority,
    pub user_id: i64,
}

/// Filter for the support-side ticket list. `status` is compared literally.
#[derive(Debug, Default)]
pub struct TicketFilter {
    pub status: Option<String>,
    pub search: Option<String>,
}

/// A demo ticket inserted by the seeder, possibly already past `open`.
pub struct SeedTicket<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub status: TicketStatus,
    pub priority: Priority,
    pub taken_by: Option<i64>,
    /// How long ago the ticket reached `resolved`/`closed`, in hours.
    pub finished_hours_ago: Option<i64>,
}
