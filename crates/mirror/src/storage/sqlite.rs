//! SQLite-based mirror storage with zstd-compressed bodies

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::{MailStore, UpsertOutcome};
use crate::models::{Account, Email, EmailId, Folder, RemoteId, SyncState, ThreadId};
use crate::query::EmailQuery;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Mirrored emails; seq records insertion order
            CREATE TABLE emails (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                remote_id TEXT UNIQUE,
                thread_id TEXT NOT NULL,
                from_address TEXT NOT NULL,
                from_display_name TEXT NOT NULL,
                to_address TEXT NOT NULL,
                to_display_name TEXT NOT NULL,
                subject TEXT NOT NULL,
                preview TEXT NOT NULL,
                body_text BLOB,  -- zstd compressed
                body_html BLOB,  -- zstd compressed
                sent_at TEXT NOT NULL,  -- fixed-width UTC, sorts lexically
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                folder TEXT NOT NULL,
                message_id_header TEXT NOT NULL DEFAULT '',
                in_reply_to TEXT NOT NULL DEFAULT '',
                references_header TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX idx_emails_folder_sent_at ON emails(folder, sent_at DESC);
            CREATE INDEX idx_emails_thread_id ON emails(thread_id);

            -- Sync state per account
            CREATE TABLE sync_state (
                account_id TEXT PRIMARY KEY,
                history_id TEXT NOT NULL,
                last_sync_at TEXT NOT NULL,
                sync_version INTEGER NOT NULL DEFAULT 1,
                initial_sync_complete INTEGER NOT NULL DEFAULT 0
            );

            -- The single authenticated account
            CREATE TABLE account (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                email TEXT NOT NULL,
                display_name TEXT,
                refresh_token TEXT NOT NULL,
                added_at TEXT NOT NULL
            );

            -- Revoked session tokens, kept until their natural expiry
            CREATE TABLE revoked_tokens (
                token_id TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );

            CREATE INDEX idx_revoked_tokens_expires_at ON revoked_tokens(expires_at);
            "#,
        ),
    ])
}

const EMAIL_COLUMNS: &str = "id, remote_id, thread_id, from_address, from_display_name,
    to_address, to_display_name, subject, preview, body_text, body_html, sent_at,
    is_read, is_starred, folder, message_id_header, in_reply_to, references_header";

/// Timestamps are stored fixed-width so text order equals time order
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", raw))
}

fn compress(body: &str) -> Result<Option<Vec<u8>>> {
    if body.is_empty() {
        return Ok(None);
    }
    // Level 3 = good balance of speed vs compression
    Ok(Some(
        zstd::encode_all(body.as_bytes(), 3).context("Failed to compress body")?,
    ))
}

fn decompress(data: Option<Vec<u8>>) -> Result<String> {
    let Some(data) = data else {
        return Ok(String::new());
    };
    let bytes = zstd::decode_all(data.as_slice()).context("Failed to decompress body")?;
    String::from_utf8(bytes).context("Body is not valid UTF-8")
}

/// Raw columns of an `emails` row
struct EmailRow {
    id: String,
    remote_id: Option<String>,
    thread_id: String,
    from_address: String,
    from_display_name: String,
    to_address: String,
    to_display_name: String,
    subject: String,
    preview: String,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
    sent_at: String,
    is_read: bool,
    is_starred: bool,
    folder: String,
    message_id_header: String,
    in_reply_to: String,
    references: String,
}

impl EmailRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            thread_id: row.get(2)?,
            from_address: row.get(3)?,
            from_display_name: row.get(4)?,
            to_address: row.get(5)?,
            to_display_name: row.get(6)?,
            subject: row.get(7)?,
            preview: row.get(8)?,
            body_text: row.get(9)?,
            body_html: row.get(10)?,
            sent_at: row.get(11)?,
            is_read: row.get(12)?,
            is_starred: row.get(13)?,
            folder: row.get(14)?,
            message_id_header: row.get(15)?,
            in_reply_to: row.get(16)?,
            references: row.get(17)?,
        })
    }

    fn into_email(self) -> Result<Email> {
        let folder = Folder::parse(&self.folder)
            .ok_or_else(|| anyhow!("Unknown folder in database: {}", self.folder))?;
        Ok(Email {
            id: EmailId::new(self.id),
            remote_id: self.remote_id.map(RemoteId::new),
            thread_id: ThreadId::new(self.thread_id),
            from_address: self.from_address,
            from_display_name: self.from_display_name,
            to_address: self.to_address,
            to_display_name: self.to_display_name,
            subject: self.subject,
            body_text: decompress(self.body_text)?,
            body_html: decompress(self.body_html)?,
            preview: self.preview,
            sent_at: parse_ts(&self.sent_at)?,
            is_read: self.is_read,
            is_starred: self.is_starred,
            folder,
            message_id_header: self.message_id_header,
            in_reply_to: self.in_reply_to,
            references: self.references,
        })
    }
}

/// SQLite-based mirror storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed during writes; NORMAL sync is safe with WAL
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_email(conn: &Connection, column: &str, key: &str) -> Result<Option<Email>> {
        let sql = format!("SELECT {} FROM emails WHERE {} = ?", EMAIL_COLUMNS, column);
        let row = conn
            .query_row(&sql, [key], EmailRow::from_row)
            .optional()?;
        row.map(EmailRow::into_email).transpose()
    }

    fn insert_email(conn: &Connection, email: &Email) -> Result<()> {
        conn.execute(
            "INSERT INTO emails
             (id, remote_id, thread_id, from_address, from_display_name, to_address,
              to_display_name, subject, preview, body_text, body_html, sent_at,
              is_read, is_starred, folder, message_id_header, in_reply_to, references_header)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                email.id.as_str(),
                email.remote_id.as_ref().map(RemoteId::as_str),
                email.thread_id.as_str(),
                email.from_address,
                email.from_display_name,
                email.to_address,
                email.to_display_name,
                email.subject,
                email.preview,
                compress(&email.body_text)?,
                compress(&email.body_html)?,
                format_ts(&email.sent_at),
                email.is_read,
                email.is_starred,
                email.folder.as_str(),
                email.message_id_header,
                email.in_reply_to,
                email.references,
            ],
        )
        .with_context(|| format!("Failed to insert email {}", email.id.as_str()))?;
        Ok(())
    }

    /// Apply `sql` (binding the id last) and return the updated email
    fn update_flags(&self, sql: &str, mut values: Vec<Value>, id: &EmailId) -> Result<Option<Email>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        values.push(Value::Text(id.as_str().to_string()));
        let changed = tx.execute(sql, params_from_iter(values))?;
        if changed == 0 {
            return Ok(None);
        }
        let email = Self::load_email(&tx, "id", id.as_str())?;
        tx.commit()?;
        Ok(email)
    }
}

impl MailStore for SqliteMailStore {
    fn upsert_email(&self, email: Email) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(remote_id) = &email.remote_id
            && let Some(existing) = Self::load_email(&tx, "remote_id", remote_id.as_str())?
        {
            if existing.is_read == email.is_read && existing.is_starred == email.is_starred {
                return Ok(UpsertOutcome::Unchanged(existing));
            }
            tx.execute(
                "UPDATE emails SET is_read = ?, is_starred = ? WHERE remote_id = ?",
                params![email.is_read, email.is_starred, remote_id.as_str()],
            )?;
            tx.commit()?;
            return Ok(UpsertOutcome::Updated(Email {
                is_read: email.is_read,
                is_starred: email.is_starred,
                ..existing
            }));
        }

        Self::insert_email(&tx, &email)?;
        tx.commit()?;
        Ok(UpsertOutcome::Inserted(email))
    }

    fn get_email(&self, id: &EmailId) -> Result<Option<Email>> {
        let conn = self.conn.lock().unwrap();
        Self::load_email(&conn, "id", id.as_str())
    }

    fn get_by_remote_id(&self, id: &RemoteId) -> Result<Option<Email>> {
        let conn = self.conn.lock().unwrap();
        Self::load_email(&conn, "remote_id", id.as_str())
    }

    fn has_remote_id(&self, id: &RemoteId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM emails WHERE remote_id = ?)",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn query_emails(&self, query: &EmailQuery) -> Result<Vec<Email>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(folder) = query.folder {
            clauses.push("folder = ?");
            values.push(Value::Text(folder.as_str().to_string()));
        }
        if query.unread_only {
            clauses.push("is_read = 0");
        }
        if let Some(from) = &query.date_from {
            clauses.push("sent_at >= ?");
            values.push(Value::Text(format_ts(from)));
        }
        if let Some(to) = &query.date_to {
            clauses.push("sent_at <= ?");
            values.push(Value::Text(format_ts(to)));
        }

        let mut sql = format!("SELECT {} FROM emails", EMAIL_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY sent_at DESC, seq ASC");

        // Text filters run over decompressed bodies, so the limit applies after them
        let text_filtered = query.has_text_filters();
        if !text_filtered {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(query.effective_limit() as i64));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), EmailRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut emails = Vec::new();
        for row in rows {
            let email = row.into_email()?;
            if text_filtered && !query.matches(&email) {
                continue;
            }
            emails.push(email);
            if emails.len() >= query.effective_limit() {
                break;
            }
        }
        Ok(emails)
    }

    fn list_thread(&self, thread_id: &ThreadId) -> Result<Vec<Email>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM emails WHERE thread_id = ? ORDER BY sent_at ASC, seq ASC",
            EMAIL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([thread_id.as_str()], EmailRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EmailRow::into_email).collect()
    }

    fn set_read(&self, id: &EmailId, is_read: bool) -> Result<Option<Email>> {
        self.update_flags(
            "UPDATE emails SET is_read = ? WHERE id = ?",
            vec![Value::Integer(is_read as i64)],
            id,
        )
    }

    fn toggle_starred(&self, id: &EmailId) -> Result<Option<Email>> {
        self.update_flags(
            "UPDATE emails SET is_starred = NOT is_starred WHERE id = ?",
            Vec::new(),
            id,
        )
    }

    fn count_emails(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear_mail_data(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM emails", [])?;
        Ok(())
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String, u32, bool)> = conn
            .query_row(
                "SELECT account_id, history_id, last_sync_at, sync_version, initial_sync_complete
                 FROM sync_state WHERE account_id = ?",
                [account_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((account_id, history_id, last_sync_at, sync_version, initial_sync_complete)) = row
        else {
            return Ok(None);
        };

        Ok(Some(SyncState {
            account_id,
            history_id,
            last_sync_at: parse_ts(&last_sync_at)?,
            sync_version,
            initial_sync_complete,
        }))
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_state
             (account_id, history_id, last_sync_at, sync_version, initial_sync_complete)
             VALUES (?, ?, ?, ?, ?)",
            params![
                state.account_id,
                state.history_id,
                format_ts(&state.last_sync_at),
                state.sync_version,
                state.initial_sync_complete,
            ],
        )?;
        Ok(())
    }

    fn delete_sync_state(&self, account_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_state WHERE account_id = ?", [account_id])?;
        Ok(())
    }

    fn load_account(&self) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, Option<String>, String, String)> = conn
            .query_row(
                "SELECT email, display_name, refresh_token, added_at FROM account WHERE slot = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((email, display_name, refresh_token, added_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Account {
            email,
            display_name,
            refresh_token,
            added_at: parse_ts(&added_at)?,
        }))
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO account (slot, email, display_name, refresh_token, added_at)
             VALUES (1, ?, ?, ?, ?)",
            params![
                account.email,
                account.display_name,
                account.refresh_token,
                format_ts(&account.added_at),
            ],
        )
        .context("Failed to save account")?;
        Ok(())
    }

    fn delete_account(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM account", [])?;
        Ok(())
    }

    fn revoke_token(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO revoked_tokens (token_id, expires_at) VALUES (?, ?)",
            params![token_id, format_ts(&expires_at)],
        )?;
        Ok(())
    }

    fn is_token_revoked(&self, token_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let revoked: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token_id = ?)",
            [token_id],
            |row| row.get(0),
        )?;
        Ok(revoked)
    }

    fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let purged = conn.execute(
            "DELETE FROM revoked_tokens WHERE expires_at <= ?",
            [format_ts(&now)],
        )?;
        Ok(purged)
    }
}
