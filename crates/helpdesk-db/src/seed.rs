use anyhow::{Result, anyhow};
use tracing::{info, warn};

use helpdesk_types::{Priority, TicketStatus};

use crate::Database;
use crate::models::SeedTicket;

pub const DEFAULT_DEPTS: &[(&str, &str)] = &[
    ("IT Support", "+7 (495) 123-45-67"),
    ("Sales", "+7 (495) 123-45-68"),
    ("Accounting", "+7 (495) 123-45-69"),
    ("HR", "+7 (495) 123-45-70"),
];

impl Database {
    /// Insert the given departments when the table is empty. Returns how many were written.
    pub fn seed_depts(&self, depts: &[(&str, &str)]) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let existing: i64 = conn.query_row("SELECT COUNT(*) FROM depts", [], |r| r.get(0))?;
            if existing > 0 {
                return Ok(0);
            }

            let mut written = 0;
            for (name, phone) in depts {
                written += conn.execute(
                    "INSERT INTO depts (name, phone) VALUES (?1, ?2) ON CONFLICT (name) DO NOTHING",
                    (name, phone),
                )?;
            }
            info!("Seeded {} departments", written);
            Ok(written)
        })
    }

    /// Give `requester` a spread of demo tickets (one per status, padded with
    /// open ones up to `per_user`). Does nothing once any ticket exists.
    pub fn seed_demo_tickets(
        &self,
        requester: &str,
        support: Option<&str>,
        per_user: usize,
    ) -> Result<usize> {
        if self.count_tickets()? > 0 {
            return Ok(0);
        }

        let user_id = self
            .get_user_id_by_username(requester)?
            .ok_or_else(|| anyhow!("seed tickets: user '{}' not found (seed users first)", requester))?;

        let support_id = match support {
            Some(name) => {
                let id = self.get_user_id_by_username(name)?;
                if id.is_none() {
                    warn!("seed tickets: support user '{}' not found, tickets stay unassigned", name);
                }
                id
            }
            None => None,
        };

        let per_user = if per_user == 0 { 6 } else { per_user };
        let seeds = demo_tickets(support_id, per_user);
        for seed in &seeds {
            self.insert_seed_ticket(user_id, seed)?;
        }

        info!("Seeded {} demo tickets for {}", seeds.len(), requester);
        Ok(seeds.len())
    }
}

fn demo_tickets(support_id: Option<i64>, per_user: usize) -> Vec<SeedTicket<'static>> {
    let mut seeds = vec![
        SeedTicket {
            title: "Cannot sign in",
            description: "Signing in fails with an error after entering login and password.",
            status: TicketStatus::Open,
            priority: Priority::High,
            taken_by: None,
            finished_hours_ago: None,
        },
        SeedTicket {
            title: "Ticket list is empty",
            description: "The tickets page opens, but the list shows nothing.",
            status: TicketStatus::InProgress,
            priority: Priority::Medium,
            taken_by: support_id,
            finished_hours_ago: None,
        },
        SeedTicket {
            title: "Attachments do not open",
            description: "Clicking an attachment does nothing.",
            status: TicketStatus::Resolved,
            priority: Priority::Low,
            taken_by: support_id,
            finished_hours_ago: Some(6),
        },
        SeedTicket {
            title: "Password reset",
            description: "The account password needs a reset.",
            status: TicketStatus::Closed,
            priority: Priority::Medium,
            taken_by: support_id,
            finished_hours_ago: Some(24),
        },
    ];

    while seeds.len() < per_user {
        seeds.push(SeedTicket {
            title: "Sample ticket",
            description: "Generated ticket for trying out the interface.",
            status: TicketStatus::Open,
            priority: Priority::Low,
            taken_by: None,
            finished_hours_ago: None,
        });
    }

    seeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, TicketFilter};
    use helpdesk_types::Role;

    #[test]
    fn depts_are_seeded_once() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.seed_depts(DEFAULT_DEPTS).unwrap(), 4);
        assert_eq!(db.seed_depts(DEFAULT_DEPTS).unwrap(), 0);
    }

    #[test]
    fn demo_tickets_cover_each_status() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&NewUser {
            username: "user1",
            email: "user1@local.test",
            password_hash: "hash",
            first_name: "Ivan",
            last_name: "Petrov",
            phone: None,
            dept_name: None,
            role: Role::User,
        })
        .unwrap();

        assert_eq!(db.seed_demo_tickets("user1", Some("missing"), 6).unwrap(), 6);
        assert_eq!(db.seed_demo_tickets("user1", None, 6).unwrap(), 0);

        let closed = db
            .list_tickets(
                &TicketFilter {
                    status: Some("closed".into()),
                    search: None,
                },
                200,
            )
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].assignee_first.is_none());
    }

    #[test]
    fn demo_tickets_need_requester() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.seed_demo_tickets("ghost", None, 6).is_err());
    }
}
