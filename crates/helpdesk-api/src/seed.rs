use anyhow::Result;
use tracing::{debug, info, warn};

use helpdesk_db::Database;
use helpdesk_db::models::NewUser;
use helpdesk_db::seed::DEFAULT_DEPTS;
use helpdesk_types::Role;

use crate::config::{SeedAccount, SeedConfig};
use crate::password::hash_password;

/// Bring a fresh store up to a usable state. Safe to run on every start:
/// each step skips work that is already present.
pub fn run(db: &Database, seed: &SeedConfig) -> Result<()> {
    if seed.depts {
        db.seed_depts(DEFAULT_DEPTS)?;
    }

    for account in &seed.support {
        ensure_account(db, account, Role::Support)?;
    }
    if let Some(user) = &seed.user {
        ensure_account(db, user, Role::User)?;
    }

    if seed.tickets {
        match &seed.user {
            Some(user) => {
                let support = seed.support.first().map(|a| a.login.as_str());
                db.seed_demo_tickets(&user.login, support, seed.tickets_per_user)?;
            }
            None => warn!("SEED_TICKETS is on but SEED_USER is off; no demo tickets"),
        }
    }

    Ok(())
}

/// Create the account unless the username is taken. Returns whether it was created.
fn ensure_account(db: &Database, account: &SeedAccount, role: Role) -> Result<bool> {
    if db.get_user_id_by_username(&account.login)?.is_some() {
        debug!("Seed account '{}' already exists", account.login);
        return Ok(false);
    }

    let password_hash = hash_password(&account.password)?;
    let created = db.create_user_if_absent(&NewUser {
        username: &account.login,
        email: &account.email,
        password_hash: &password_hash,
        first_name: &account.first_name,
        last_name: &account.last_name,
        phone: account.phone.as_deref(),
        dept_name: account.dept.as_deref(),
        role,
    })?;

    if created {
        info!("Seeded {} account '{}'", role, account.login);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use helpdesk_db::models::TicketFilter;

    use super::*;
    use crate::password::verify_password;

    fn account(login: &str, dept: Option<&str>) -> SeedAccount {
        SeedAccount {
            login: login.into(),
            email: format!("{login}@local.test"),
            password: format!("{login}-pass"),
            first_name: "Seed".into(),
            last_name: login.into(),
            phone: None,
            dept: dept.map(String::from),
        }
    }

    fn config() -> SeedConfig {
        SeedConfig {
            depts: true,
            support: vec![account("admin", Some("IT Support"))],
            user: Some(account("user1", None)),
            tickets: true,
            tickets_per_user: 6,
        }
    }

    #[test]
    fn seeding_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let cfg = config();

        run(&db, &cfg).unwrap();
        run(&db, &cfg).unwrap();

        let admin = db.get_user_by_login("admin").unwrap().unwrap();
        assert_eq!(admin.role, "support");
        assert_eq!(admin.dept_name.as_deref(), Some("IT Support"));
        assert!(verify_password("admin-pass", &admin.password_hash).unwrap());

        let user = db.get_user_by_login("user1@local.test").unwrap().unwrap();
        assert_eq!(user.role, "user");

        assert_eq!(db.count_tickets().unwrap(), 6);
        let tickets = db.list_tickets(&TicketFilter::default(), 200).unwrap();
        assert!(tickets.iter().any(|t| t.status == "closed"));
    }

    #[test]
    fn tickets_need_a_seed_user() {
        let db = Database::open_in_memory().unwrap();
        let cfg = SeedConfig {
            user: None,
            ..config()
        };
        run(&db, &cfg).unwrap();
        assert_eq!(db.count_tickets().unwrap(), 0);
        assert_eq!(db.list_support_users().unwrap().len(), 1);
    }
}
