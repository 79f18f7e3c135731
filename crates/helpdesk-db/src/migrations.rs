use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE depts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                phone       TEXT,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                first_name      TEXT NOT NULL,
                last_name       TEXT NOT NULL,
                phone           TEXT,
                dept_id         INTEGER REFERENCES depts(id) ON DELETE SET NULL,
                role            TEXT NOT NULL CHECK (role IN ('user', 'support')),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE TABLE tickets (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_number   TEXT NOT NULL UNIQUE,
                title           TEXT NOT NULL,
                description     TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'open'
                                CHECK (status IN ('open', 'in_progress', 'resolved', 'closed', 'reopened')),
                priority        TEXT NOT NULL DEFAULT 'medium'
                                CHECK (priority IN ('low', 'medium', 'high')),
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                taken_by        INTEGER REFERENCES users(id) ON DELETE SET NULL,
                support_reply   TEXT,
                replied_at      TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                resolved_at     TEXT,
                closed_at       TEXT
            );

            CREATE INDEX idx_tickets_user ON tickets(user_id, created_at);
            CREATE INDEX idx_tickets_status ON tickets(status, created_at);

            CREATE TABLE ticket_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id   INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                author_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
                message     TEXT NOT NULL CHECK (length(trim(message)) > 0),
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE INDEX idx_ticket_messages_ticket ON ticket_messages(ticket_id, created_at, id);

            -- Ticket numbers come from here, never from MAX(id).
            CREATE TABLE counters (
                name    TEXT PRIMARY KEY,
                value   INTEGER NOT NULL
            );
            INSERT INTO counters (name, value) VALUES ('ticket_number', 0);

            -- Refresh tokens invalidated by logout, kept until they would expire anyway.
            CREATE TABLE revoked_tokens (
                jti         TEXT PRIMARY KEY,
                expires_at  INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);

        let counter: i64 = conn
            .query_row(
                "SELECT value FROM counters WHERE name = 'ticket_number'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(counter, 0);
    }
}
