//! Conversions from store rows to the JSON shapes handlers return.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use helpdesk_db::models::{MessageRow, SupportUserRow, TicketListRow, TicketRow, UserRow};
use helpdesk_types::api::{SupportUser, TicketDetail, TicketListItem, TicketMessage, UserProfile};
use helpdesk_types::{Priority, Role, TicketStatus};

use crate::error::ApiError;

/// Shown when a person has no usable name on file.
const NO_NAME: &str = "—";

pub(crate) fn user_profile(row: UserRow) -> Result<UserProfile, ApiError> {
    let role: Role = row
        .role
        .parse()
        .map_err(|e| ApiError::Store(anyhow::anyhow!("user {}: {}", row.id, e)))?;
    Ok(UserProfile {
        id: row.id,
        name: display_name(Some(&row.first_name), Some(&row.last_name)),
        role,
        username: row.username,
        email: row.email,
    })
}

pub(crate) fn support_user(row: SupportUserRow) -> SupportUser {
    SupportUser {
        id: row.id,
        name: display_name(row.first_name.as_deref(), row.last_name.as_deref()),
    }
}

pub(crate) fn ticket_detail(row: TicketRow) -> TicketDetail {
    TicketDetail {
        status: parse_status(row.id, &row.status),
        priority: parse_priority(row.id, &row.priority),
        from_name: display_name(row.requester_first.as_deref(), row.requester_last.as_deref()),
        assignee_name: full_name(row.assignee_first.as_deref(), row.assignee_last.as_deref()),
        replied_at: row.replied_at.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        resolved_at: row.resolved_at.as_deref().map(parse_timestamp),
        closed_at: row.closed_at.as_deref().map(parse_timestamp),
        id: row.id,
        ticket_number: row.ticket_number,
        title: row.title,
        description: row.description,
        requester_id: row.user_id,
        dept: row.dept_name,
        phone: row.requester_phone,
        assignee_id: row.taken_by,
        support_reply: row.support_reply,
    }
}

pub(crate) fn ticket_list_item(row: TicketListRow) -> TicketListItem {
    TicketListItem {
        status: parse_status(row.id, &row.status),
        priority: parse_priority(row.id, &row.priority),
        created_at: parse_timestamp(&row.created_at),
        assignee_name: full_name(row.assignee_first.as_deref(), row.assignee_last.as_deref()),
        id: row.id,
        ticket_number: row.ticket_number,
        title: row.title,
    }
}

pub(crate) fn ticket_message(row: MessageRow) -> TicketMessage {
    TicketMessage {
        author: display_name(row.author_first.as_deref(), row.author_last.as_deref()),
        created_at: parse_timestamp(&row.created_at),
        id: row.id,
        author_id: row.author_id,
        message: row.message,
    }
}

/// "First Last", or `None` when both parts are blank.
fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = format!("{} {}", first.unwrap_or("").trim(), last.unwrap_or("").trim());
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

fn display_name(first: Option<&str>, last: Option<&str>) -> String {
    full_name(first, last).unwrap_or_else(|| NO_NAME.to_string())
}

// CHECK constraints keep these columns valid; anything else is logged and defaulted.
fn parse_status(ticket_id: i64, value: &str) -> TicketStatus {
    value.parse().unwrap_or_else(|e| {
        warn!("Ticket {}: {}", ticket_id, e);
        TicketStatus::Open
    })
}

fn parse_priority(ticket_id: i64, value: &str) -> Priority {
    value.parse().unwrap_or_else(|e| {
        warn!("Ticket {}: {}", ticket_id, e);
        Priority::default()
    })
}

/// SQLite stores `YYYY-MM-DD HH:MM:SS[.fff]` in UTC.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| {
            warn!("Unparseable timestamp '{}'", value);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn names_are_trimmed_and_joined() {
        assert_eq!(full_name(Some(" Ivan "), Some("Petrov")).as_deref(), Some("Ivan Petrov"));
        assert_eq!(full_name(Some("Ivan"), None).as_deref(), Some("Ivan"));
        assert_eq!(full_name(Some("  "), Some("")), None);
        assert_eq!(display_name(None, None), NO_NAME);
    }

    #[test]
    fn sqlite_timestamps_parse_as_utc() {
        let ts = parse_timestamp("2025-03-04 05:06:07.891");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 3, 4));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (5, 6, 7));
        assert_eq!(ts.timestamp_subsec_millis(), 891);

        let whole = parse_timestamp("2025-03-04 05:06:07");
        assert_eq!(whole.second(), 7);
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::default());
    }

    #[test]
    fn unknown_role_is_a_store_error() {
        let row = UserRow {
            id: 9,
            username: "x".into(),
            email: "x@local.test".into(),
            password_hash: String::new(),
            first_name: "X".into(),
            last_name: String::new(),
            phone: None,
            dept_id: None,
            dept_name: None,
            role: "admin".into(),
        };
        assert!(matches!(user_profile(row), Err(ApiError::Store(_))));
    }
}
