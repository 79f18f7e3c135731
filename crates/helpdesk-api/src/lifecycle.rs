use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use helpdesk_db::Database;
use helpdesk_db::models::{NewTicket, TicketFilter, TicketRow};
use helpdesk_types::api::{TicketDetail, TicketListItem, TicketMessage};
use helpdesk_types::{Identity, Priority, Role, TicketStatus};

use crate::auth::require_role;
use crate::error::ApiError;
use crate::views;

/// Hard cap on list results. There is no cursor; callers narrow with filters.
pub const LIST_LIMIT: u32 = 200;

/// Role-gated ticket operations over the store.
///
/// Every method checks the caller's role before touching the store. Status
/// transitions are single conditional updates, so a transition whose guard no
/// longer holds is a no-op that returns the ticket as it stands.
#[derive(Clone)]
pub struct TicketEngine {
    db: Arc<Database>,
}

impl TicketEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        who: &Identity,
        title: &str,
        description: &str,
        priority: &str,
    ) -> Result<TicketDetail, ApiError> {
        require_role(who, Role::User)?;

        let title = title.trim();
        let description = description.trim();
        if title.is_empty() || description.is_empty() {
            return Err(ApiError::InvalidInput("title and description are required"));
        }
        let priority = match priority.trim() {
            "" => Priority::default(),
            other => other
                .parse()
                .map_err(|_| ApiError::InvalidInput("priority must be low, medium or high"))?,
        };

        let id = self.db.create_ticket(&NewTicket {
            title,
            description,
            priority,
            user_id: who.user_id,
        })?;
        let ticket = self.reload(id)?;
        info!(
            "User {} opened ticket {} ({})",
            who.user_id, ticket.ticket_number, ticket.priority
        );
        Ok(ticket)
    }

    /// Claim a ticket for `assignee_id`. `open` moves to `in_progress`; any
    /// other status is kept.
    pub fn assign(&self, who: &Identity, ticket_id: i64, assignee_id: i64) -> Result<TicketDetail, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;
        if assignee_id <= 0 {
            return Err(ApiError::InvalidInput("assigneeId is required"));
        }

        let current = self.current_status(ticket_id)?;
        self.check_assignee(assignee_id)?;

        if !self.db.assign_ticket(ticket_id, assignee_id)? {
            return Err(ApiError::NotFound);
        }
        info!(
            "Ticket {} assigned to {} by {} ({} -> {})",
            ticket_id,
            assignee_id,
            who.user_id,
            current,
            current.after_assign()
        );
        self.reload(ticket_id)
    }

    /// Save the support reply and force `in_progress`, unless the ticket has
    /// already left `open`/`in_progress`.
    pub fn save_support_reply(
        &self,
        who: &Identity,
        ticket_id: i64,
        assignee_id: i64,
        reply: &str,
    ) -> Result<TicketDetail, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;
        let reply = reply.trim();
        if reply.is_empty() || assignee_id <= 0 {
            return Err(ApiError::InvalidInput("assigneeId and reply are required"));
        }

        let current = self.current_status(ticket_id)?;
        self.check_assignee(assignee_id)?;

        if !current.accepts_reply() {
            debug!("Reply to ticket {} ignored: status is {}", ticket_id, current);
        } else if self.db.save_support_reply(ticket_id, assignee_id, reply)? {
            info!("Support {} replied to ticket {}", who.user_id, ticket_id);
        } else {
            debug!("Reply to ticket {} lost a race with another transition", ticket_id);
        }
        self.reload(ticket_id)
    }

    /// Close a ticket. Only fires from `in_progress`.
    pub fn close(&self, who: &Identity, ticket_id: i64) -> Result<TicketDetail, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;

        let current = self.current_status(ticket_id)?;
        if !current.can_close() {
            debug!("Close of ticket {} ignored: status is {}", ticket_id, current);
        } else if self.db.close_ticket(ticket_id)? {
            info!("Ticket {} closed by {}", ticket_id, who.user_id);
        } else {
            debug!("Close of ticket {} lost a race with another transition", ticket_id);
        }
        self.reload(ticket_id)
    }

    /// Support-side message. Returns the new message id.
    pub fn add_message(&self, who: &Identity, ticket_id: i64, text: &str) -> Result<i64, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;
        self.append(who, ticket_id, text)
    }

    /// Requester-side message; other users' tickets look missing.
    pub fn add_requester_message(&self, who: &Identity, ticket_id: i64, text: &str) -> Result<i64, ApiError> {
        require_role(who, Role::User)?;
        check_id(ticket_id)?;
        self.owned(who, ticket_id)?;
        self.append(who, ticket_id, text)
    }

    fn append(&self, who: &Identity, ticket_id: i64, text: &str) -> Result<i64, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::InvalidInput("message is required"));
        }
        let id = self
            .db
            .add_message(ticket_id, who.user_id, text)?
            .ok_or(ApiError::NotFound)?;
        debug!("User {} posted message {} on ticket {}", who.user_id, id, ticket_id);
        Ok(id)
    }

    /// `tab`: "new" is `open`, empty or "all" is unfiltered, anything else is
    /// matched literally against status. `query` matches number or title.
    pub fn list(&self, who: &Identity, tab: &str, query: &str) -> Result<Vec<TicketListItem>, ApiError> {
        require_role(who, Role::Support)?;

        let status = match tab.trim() {
            "" | "all" => None,
            "new" => Some(TicketStatus::Open.as_str().to_string()),
            other => Some(other.to_string()),
        };
        let query = query.trim();
        let filter = TicketFilter {
            status,
            search: (!query.is_empty()).then(|| query.to_string()),
        };

        let rows = self.db.list_tickets(&filter, LIST_LIMIT)?;
        Ok(rows.into_iter().map(views::ticket_list_item).collect())
    }

    /// The caller's own tickets, newest first.
    pub fn list_mine(&self, who: &Identity) -> Result<Vec<TicketListItem>, ApiError> {
        let rows = self.db.list_tickets_for_requester(who.user_id, LIST_LIMIT)?;
        Ok(rows.into_iter().map(views::ticket_list_item).collect())
    }

    pub fn get(&self, who: &Identity, ticket_id: i64) -> Result<TicketDetail, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;
        let row = self.db.get_ticket(ticket_id)?.ok_or(ApiError::NotFound)?;
        Ok(views::ticket_detail(row))
    }

    /// `NotFound`, never `Forbidden`, for a ticket filed by someone else.
    pub fn get_mine(&self, who: &Identity, ticket_id: i64) -> Result<TicketDetail, ApiError> {
        check_id(ticket_id)?;
        Ok(views::ticket_detail(self.owned(who, ticket_id)?))
    }

    pub fn list_messages(&self, who: &Identity, ticket_id: i64) -> Result<Vec<TicketMessage>, ApiError> {
        require_role(who, Role::Support)?;
        check_id(ticket_id)?;
        self.current_status(ticket_id)?;
        self.messages(ticket_id)
    }

    pub fn list_requester_messages(&self, who: &Identity, ticket_id: i64) -> Result<Vec<TicketMessage>, ApiError> {
        check_id(ticket_id)?;
        self.owned(who, ticket_id)?;
        self.messages(ticket_id)
    }

    fn messages(&self, ticket_id: i64) -> Result<Vec<TicketMessage>, ApiError> {
        let rows = self.db.list_messages(ticket_id)?;
        Ok(rows.into_iter().map(views::ticket_message).collect())
    }

    fn owned(&self, who: &Identity, ticket_id: i64) -> Result<TicketRow, ApiError> {
        self.db
            .get_ticket_for_requester(ticket_id, who.user_id)?
            .ok_or(ApiError::NotFound)
    }

    fn current_status(&self, ticket_id: i64) -> Result<TicketStatus, ApiError> {
        let row = self.db.get_ticket(ticket_id)?.ok_or(ApiError::NotFound)?;
        row.status
            .parse()
            .map_err(|e| ApiError::Store(anyhow!("ticket {}: {}", ticket_id, e)))
    }

    fn check_assignee(&self, assignee_id: i64) -> Result<(), ApiError> {
        match self.db.get_user_by_id(assignee_id)? {
            Some(user) if user.role == Role::Support.as_str() => Ok(()),
            _ => Err(ApiError::InvalidInput("assignee must be a support user")),
        }
    }

    fn reload(&self, ticket_id: i64) -> Result<TicketDetail, ApiError> {
        let row = self
            .db
            .get_ticket(ticket_id)?
            .ok_or_else(|| ApiError::Store(anyhow!("ticket {} vanished after write", ticket_id)))?;
        Ok(views::ticket_detail(row))
    }
}

fn check_id(id: i64) -> Result<(), ApiError> {
    if id <= 0 {
        return Err(ApiError::InvalidInput("bad ticket id"));
    }
    Ok(())
}
