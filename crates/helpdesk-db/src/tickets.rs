use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, Row, Transaction};
use tracing::warn;

use helpdesk_types::TicketStatus;

use crate::models::{MessageRow, NewTicket, SeedTicket, TicketFilter, TicketListRow, TicketRow};
use crate::queries::OptionalExt;
use crate::{Conflict, Database};

/// Insert attempts before a ticket-number collision is reported as a conflict.
const MAX_NUMBER_ATTEMPTS: usize = 3;

const TICKET_DETAIL_SELECT: &str = "
SELECT
  t.id, t.ticket_number, t.title, t.description, t.status, t.priority,
  t.user_id, u.first_name, u.last_name, d.name, u.phone,
  t.taken_by, u2.first_name, u2.last_name,
  t.support_reply, t.replied_at, t.created_at, t.updated_at, t.resolved_at, t.closed_at
FROM tickets t
JOIN users u ON u.id = t.user_id
LEFT JOIN depts d ON d.id = u.dept_id
LEFT JOIN users u2 ON u2.id = t.taken_by";

const TICKET_LIST_SELECT: &str = "
SELECT
  t.id, t.ticket_number, t.title, t.created_at, t.priority, t.status,
  u2.first_name, u2.last_name
FROM tickets t
LEFT JOIN users u2 ON u2.id = t.taken_by";

impl Database {
    /// Create an `open`, unassigned ticket and return its id.
    pub fn create_ticket(&self, ticket: &NewTicket<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            with_number_retry(conn, |tx, number| {
                tx.execute(
                    "INSERT INTO tickets (ticket_number, title, description, status, priority, user_id)
                     VALUES (?1, ?2, ?3, 'open', ?4, ?5)",
                    rusqlite::params![
                        number,
                        ticket.title,
                        ticket.description,
                        ticket.priority.as_str(),
                        ticket.user_id,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
        })
    }

    pub fn insert_seed_ticket(&self, user_id: i64, seed: &SeedTicket<'_>) -> Result<i64> {
        let finished = seed.finished_hours_ago.map(|h| format!("-{} hours", h));
        let resolved_at = finished
            .as_ref()
            .filter(|_| seed.status == TicketStatus::Resolved);
        let closed_at = finished
            .as_ref()
            .filter(|_| seed.status == TicketStatus::Closed);

        self.with_conn_mut(|conn| {
            with_number_retry(conn, |tx, number| {
                tx.execute(
                    "INSERT INTO tickets (ticket_number, title, description, status, priority, user_id,
                                          taken_by, resolved_at, closed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                             CASE WHEN ?8 IS NULL THEN NULL ELSE strftime('%Y-%m-%d %H:%M:%f', 'now', ?8) END,
                             CASE WHEN ?9 IS NULL THEN NULL ELSE strftime('%Y-%m-%d %H:%M:%f', 'now', ?9) END)",
                    rusqlite::params![
                        number,
                        seed.title,
                        seed.description,
                        seed.status.as_str(),
                        seed.priority.as_str(),
                        user_id,
                        seed.taken_by,
                        resolved_at,
                        closed_at,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
        })
    }

    pub fn count_tickets(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tickets", [], |r| r.get(0))?))
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| {
            let sql = format!("{TICKET_DETAIL_SELECT}\nWHERE t.id = ?1");
            conn.query_row(&sql, [id], map_ticket).optional()
        })
    }

    /// Same as `get_ticket`, but only when `user_id` filed the ticket.
    pub fn get_ticket_for_requester(&self, id: i64, user_id: i64) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| {
            let sql = format!("{TICKET_DETAIL_SELECT}\nWHERE t.id = ?1 AND t.user_id = ?2");
            conn.query_row(&sql, [id, user_id], map_ticket).optional()
        })
    }

    pub fn list_tickets(&self, filter: &TicketFilter, limit: u32) -> Result<Vec<TicketListRow>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(status) = &filter.status {
            params.push(Value::Text(status.clone()));
            clauses.push(format!("t.status = ?{}", params.len()));
        }

        if let Some(search) = &filter.search {
            params.push(Value::Text(search.to_lowercase()));
            let n = params.len();
            clauses.push(format!(
                "(instr(casefold(t.ticket_number), ?{n}) > 0 OR instr(casefold(t.title), ?{n}) > 0)"
            ));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        params.push(Value::Integer(i64::from(limit)));
        let sql = format!(
            "{TICKET_LIST_SELECT}\n{where_clause}\nORDER BY t.created_at DESC, t.id DESC\nLIMIT ?{}",
            params.len()
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), map_list_item)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_tickets_for_requester(&self, user_id: i64, limit: u32) -> Result<Vec<TicketListRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{TICKET_LIST_SELECT}\nWHERE t.user_id = ?1\nORDER BY t.created_at DESC, t.id DESC\nLIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], map_list_item)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Transitions --
    //
    // Each transition is one UPDATE whose WHERE clause carries the status
    // guard, so concurrent callers cannot both apply an exclusive transition.
    // The return value says whether a row changed.

    /// Set the assignee; `open` becomes `in_progress`, any other status is kept.
    pub fn assign_ticket(&self, id: i64, assignee_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET taken_by = ?1,
                     status = CASE WHEN status = 'open' THEN 'in_progress' ELSE status END,
                     updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?2",
                rusqlite::params![assignee_id, id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Store a support reply, only while the ticket is `open` or `in_progress`.
    pub fn save_support_reply(&self, id: i64, assignee_id: i64, reply: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET taken_by = ?1,
                     support_reply = ?2,
                     replied_at = strftime('%Y-%m-%d %H:%M:%f', 'now'),
                     status = 'in_progress',
                     updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?3
                   AND status IN ('open', 'in_progress')",
                rusqlite::params![assignee_id, reply, id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Close a ticket, only from `in_progress`.
    pub fn close_ticket(&self, id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET status = 'closed',
                     closed_at = strftime('%Y-%m-%d %H:%M:%f', 'now'),
                     updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1
                   AND status = 'in_progress'",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Append a message. Returns `None` when the ticket does not exist.
    pub fn add_message(&self, ticket_id: i64, author_id: i64, message: &str) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO ticket_messages (ticket_id, author_id, message)
                 SELECT id, ?2, ?3 FROM tickets WHERE id = ?1",
                rusqlite::params![ticket_id, author_id, message],
            )?;
            Ok((changed > 0).then(|| conn.last_insert_rowid()))
        })
    }

    pub fn list_messages(&self, ticket_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.ticket_id, m.author_id, u.first_name, u.last_name, m.message, m.created_at
                 FROM ticket_messages m
                 LEFT JOIN users u ON u.id = m.author_id
                 WHERE m.ticket_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC",
            )?;

            let rows = stmt
                .query_map([ticket_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        author_id: row.get(2)?,
                        author_first: row.get(3)?,
                        author_last: row.get(4)?,
                        message: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

/// Run `insert` in a transaction with the next ticket number. On a uniqueness
/// collision the counter is moved past the highest stored number and the
/// insert is retried.
fn with_number_retry<F>(conn: &Connection, mut insert: F) -> Result<i64>
where
    F: FnMut(&Transaction<'_>, &str) -> rusqlite::Result<i64>,
{
    for attempt in 1..=MAX_NUMBER_ATTEMPTS {
        let tx = conn.unchecked_transaction()?;
        let number = next_ticket_number(&tx)?;

        match insert(&tx, &number) {
            Ok(id) => {
                tx.commit()?;
                return Ok(id);
            }
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                warn!(
                    "Ticket number {} already taken (attempt {}/{})",
                    number, attempt, MAX_NUMBER_ATTEMPTS
                );
                resync_counter(conn)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Conflict("ticket_number").into())
}

fn next_ticket_number(tx: &Transaction<'_>) -> rusqlite::Result<String> {
    let value: i64 = tx.query_row(
        "UPDATE counters SET value = value + 1 WHERE name = 'ticket_number' RETURNING value",
        [],
        |row| row.get(0),
    )?;
    Ok(format!("{:06}", value))
}

fn resync_counter(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE counters
         SET value = MAX(value, (SELECT COALESCE(MAX(CAST(ticket_number AS INTEGER)), 0) FROM tickets))
         WHERE name = 'ticket_number'",
        [],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn map_ticket(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        user_id: row.get(6)?,
        requester_first: row.get(7)?,
        requester_last: row.get(8)?,
        dept_name: row.get(9)?,
        requester_phone: row.get(10)?,
        taken_by: row.get(11)?,
        assignee_first: row.get(12)?,
        assignee_last: row.get(13)?,
        support_reply: row.get(14)?,
        replied_at: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        resolved_at: row.get(18)?,
        closed_at: row.get(19)?,
    })
}

fn map_list_item(row: &Row<'_>) -> rusqlite::Result<TicketListRow> {
    Ok(TicketListRow {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        assignee_first: row.get(6)?,
        assignee_last: row.get(7)?,
    })
}
