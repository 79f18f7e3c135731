use anyhow::Result;
use rusqlite::{Connection, Row};

use crate::Database;
use crate::models::{NewUser, SupportUserRow, UserRow};

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.password_hash, u.first_name, u.last_name,
            u.phone, u.dept_id, d.name, u.role";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let dept_id = dept_id_by_name(conn, user.dept_name)?;
            conn.execute(
                "INSERT INTO users (username, email, password_hash, first_name, last_name, phone, dept_id, role)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.phone,
                    dept_id,
                    user.role.as_str(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert unless the username is taken. Returns whether a row was written.
    pub fn create_user_if_absent(&self, user: &NewUser<'_>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let dept_id = dept_id_by_name(conn, user.dept_name)?;
            let changed = conn.execute(
                "INSERT INTO users (username, email, password_hash, first_name, last_name, phone, dept_id, role)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (username) DO NOTHING",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.phone,
                    dept_id,
                    user.role.as_str(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Look a user up by username or email.
    pub fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS}
                 FROM users u
                 LEFT JOIN depts d ON d.id = u.dept_id
                 WHERE u.username = ?1 OR u.email = ?1
                 ORDER BY u.id
                 LIMIT 1"
            );
            conn.query_row(&sql, [login], map_user).optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS}
                 FROM users u
                 LEFT JOIN depts d ON d.id = u.dept_id
                 WHERE u.id = ?1"
            );
            conn.query_row(&sql, [id], map_user).optional()
        })
    }

    pub fn get_user_id_by_username(&self, username: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn list_support_users(&self) -> Result<Vec<SupportUserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, first_name, last_name
                 FROM users
                 WHERE role = 'support'
                 ORDER BY last_name, first_name, id",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(SupportUserRow {
                        id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Revoked refresh tokens --

    /// Record a logged-out token. Entries past their expiry are dropped on the way.
    pub fn revoke_token(&self, jti: &str, expires_at: i64, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM revoked_tokens WHERE expires_at <= ?1", [now])?;
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
                rusqlite::params![jti, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn is_token_revoked(&self, jti: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM revoked_tokens WHERE jti = ?1", [jti], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn dept_id_by_name(conn: &Connection, name: Option<&str>) -> Result<Option<i64>> {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    conn.query_row("SELECT id FROM depts WHERE name = ?1", [name], |row| row.get(0))
        .optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        phone: row.get(6)?,
        dept_id: row.get(7)?,
        dept_name: row.get(8)?,
        role: row.get(9)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
