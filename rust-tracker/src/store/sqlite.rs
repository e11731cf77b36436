//! SQLite tracking store.
//!
//! Several processes (sender, poller, web server) may open the same database
//! file. SQLite's own locking serializes their writes; a busy timeout makes
//! a contended writer wait instead of failing. The `sent -> replied`
//! check-and-set runs inside an immediate transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::{MarkOutcome, MarkTarget, TrackingStore};
use crate::error::StoreError;
use crate::model::{normalize_address, CampaignWindow, SendStatus, TrackingEntry};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const COLUMNS: &str = "tracking_id, recipient, subject, body, sent_at, status, replied_at";

/// Tracking store in a SQLite database file.
///
/// `rusqlite::Connection` is `!Sync`, so access goes through a `Mutex` on a
/// blocking thread.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;

        info!(path = %path.display(), "sqlite_store_opened");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Io(std::io::Error::other("sqlite connection mutex poisoned")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracking_entries (
            tracking_id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'sent',
            replied_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tracking_recipient ON tracking_entries(recipient);
        CREATE INDEX IF NOT EXISTS idx_tracking_sent_at ON tracking_entries(sent_at);",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so text order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed(format!("bad timestamp {:?}: {}", raw, e)))
}

struct EntryRow {
    tracking_id: String,
    recipient: String,
    subject: String,
    body: String,
    sent_at: String,
    status: String,
    replied_at: Option<String>,
}

impl EntryRow {
    fn into_entry(self) -> Result<TrackingEntry, StoreError> {
        let status = match self.status.as_str() {
            "sent" => SendStatus::Sent,
            "replied" => SendStatus::Replied,
            other => return Err(StoreError::Malformed(format!("unknown status {:?}", other))),
        };

        Ok(TrackingEntry {
            tracking_id: Uuid::parse_str(&self.tracking_id)
                .map_err(|e| StoreError::Malformed(format!("bad tracking id: {}", e)))?,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
            sent_at: parse_timestamp(&self.sent_at)?,
            status,
            replied_at: self.replied_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[async_trait]
impl TrackingStore for SqliteStore {
    async fn register_send(&self, entry: &TrackingEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        let tracking_id = entry.tracking_id;

        self.with_conn(move |conn| {
            let result = conn.execute(
                &format!("INSERT INTO tracking_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", COLUMNS),
                params![
                    entry.tracking_id.to_string(),
                    normalize_address(&entry.recipient),
                    entry.subject,
                    entry.body,
                    timestamp(entry.sent_at),
                    entry.status.as_str(),
                    entry.replied_at.map(timestamp),
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::Duplicate(entry.tracking_id))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        info!(tracking_id = %tracking_id, "sqlite_store_registered");
        Ok(())
    }

    async fn mark_replied(&self, target: &MarkTarget) -> Result<MarkOutcome, StoreError> {
        let (column, key) = match target {
            MarkTarget::TrackingId(id) => ("tracking_id", id.to_string()),
            MarkTarget::Recipient(address) => ("recipient", normalize_address(address)),
        };
        let description = target.to_string();
        let at = timestamp(Utc::now());

        let outcome = self
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let targeted: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM tracking_entries WHERE {} = ?1", column),
                    params![key],
                    |row| row.get(0),
                )?;
                if targeted == 0 {
                    return Err(StoreError::NotFound(description));
                }

                let marked = tx.execute(
                    &format!(
                        "UPDATE tracking_entries SET status = 'replied', replied_at = ?2
                         WHERE {} = ?1 AND status = 'sent'",
                        column
                    ),
                    params![key, at],
                )?;
                tx.commit()?;

                Ok(if marked == 0 {
                    MarkOutcome::Unchanged
                } else {
                    MarkOutcome::Marked(marked)
                })
            })
            .await?;

        debug!(target = %target, marked = outcome.marked(), "sqlite_store_marked");
        Ok(outcome)
    }

    async fn list_sent(&self, window: CampaignWindow) -> Result<Vec<TrackingEntry>, StoreError> {
        let since = timestamp(window.since(Utc::now()));

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tracking_entries WHERE sent_at >= ?1 ORDER BY sent_at",
                COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![since], |row| {
                    Ok(EntryRow {
                        tracking_id: row.get(0)?,
                        recipient: row.get(1)?,
                        subject: row.get(2)?,
                        body: row.get(3)?,
                        sent_at: row.get(4)?,
                        status: row.get(5)?,
                        replied_at: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(EntryRow::into_entry).collect()
        })
        .await
    }
}
