//! SQLite-backed [`DocumentStore`]: JSON bodies, content-addressed attachments, change log.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::Mutex;

use super::{Change, DocumentStore};
use crate::errors::StoreError;
use crate::types::{Attachment, MediaRecord};
use crate::utils::lock;

/// WAL tuning pragmas. Use after PRAGMA journal_mode = WAL.
const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS docs (
    id TEXT PRIMARY KEY,
    rev TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attachments (
    doc_id TEXT NOT NULL,
    name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    digest TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (doc_id, name)
);

CREATE TABLE IF NOT EXISTS changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id TEXT NOT NULL,
    deleted INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_changes_doc ON changes(doc_id);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<Change>>>,
}

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// `<generation>-<digest prefix>`; generation starts at 1.
fn next_rev(current: Option<&str>, body: &str) -> String {
    let generation = current
        .and_then(|r| r.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let digest = blake3::hash(body.as_bytes()).to_hex();
    format!("{}-{}", generation, &digest.as_str()[..16])
}

fn decode(id: &str, rev: String, body: &str) -> Result<MediaRecord> {
    let mut record: MediaRecord =
        serde_json::from_str(body).with_context(|| format!("decode document {id}"))?;
    record.id = id.to_string();
    record.rev = Some(rev);
    Ok(record)
}

fn log_change(tx: &Transaction<'_>, id: &str, deleted: bool) -> Result<u64> {
    tx.execute("DELETE FROM changes WHERE doc_id = ?1", params![id])?;
    tx.execute(
        "INSERT INTO changes (doc_id, deleted) VALUES (?1, ?2)",
        params![id, deleted as i64],
    )?;
    Ok(tx.last_insert_rowid().max(0) as u64)
}

impl SqliteStore {
    /// Open or create the store file with WAL enabled.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {}", path.display()))?;
        apply_wal_and_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory store with the same schema (tests, one-shot commands).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver to live subscribers, dropping the ones that went away.
    fn publish(&self, change: Change) {
        let mut subs = lock(&self.subscribers);
        subs.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// blake3 hex digest of a stored attachment.
    pub fn attachment_digest(&self, id: &str, name: &str) -> Result<Option<String>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT digest FROM attachments WHERE doc_id = ?1 AND name = ?2",
            params![id, name],
            |row| row.get(0),
        )
        .optional()
        .context("read attachment digest")
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<MediaRecord>> {
        let conn = lock(&self.conn);
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT rev, body FROM docs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("read document")?;
        row.map(|(rev, body)| decode(id, rev, &body)).transpose()
    }

    fn put(&self, record: &MediaRecord, attachment: Option<&Attachment>) -> Result<MediaRecord> {
        let mut stored = record.clone();
        stored.rev = None;
        let body = serde_json::to_string(&stored).context("encode document")?;

        let mut conn = lock(&self.conn);
        let tx = conn.transaction().context("begin put")?;
        let current: Option<String> = tx
            .query_row(
                "SELECT rev FROM docs WHERE id = ?1",
                params![record.id],
                |row| row.get(0),
            )
            .optional()?;
        if current.is_none() && record.rev.is_some() {
            return Err(StoreError::NotFound {
                id: record.id.clone(),
            }
            .into());
        }
        if current != record.rev {
            return Err(StoreError::Conflict {
                id: record.id.clone(),
                current,
                given: record.rev.clone(),
            }
            .into());
        }
        let rev = next_rev(current.as_deref(), &body);
        tx.execute(
            "INSERT OR REPLACE INTO docs (id, rev, body) VALUES (?1, ?2, ?3)",
            params![record.id, rev, body],
        )?;
        if let Some(att) = attachment {
            let digest = blake3::hash(&att.data).to_hex().to_string();
            tx.execute(
                "INSERT OR REPLACE INTO attachments (doc_id, name, content_type, digest, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![record.id, att.name, att.content_type, digest, att.data],
            )?;
        }
        let seq = log_change(&tx, &record.id, false)?;
        tx.commit().context("commit put")?;

        stored.rev = Some(rev);
        self.publish(Change {
            seq,
            id: stored.id.clone(),
            deleted: false,
            doc: Some(stored.clone()),
        });
        Ok(stored)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction().context("begin remove")?;
        let n = tx.execute("DELETE FROM docs WHERE id = ?1", params![id])?;
        if n == 0 {
            return Ok(false);
        }
        tx.execute("DELETE FROM attachments WHERE doc_id = ?1", params![id])?;
        let seq = log_change(&tx, id, true)?;
        tx.commit().context("commit remove")?;
        self.publish(Change {
            seq,
            id: id.to_string(),
            deleted: true,
            doc: None,
        });
        Ok(true)
    }

    fn bulk_delete(&self, docs: &[(String, Option<String>)]) -> Result<usize> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction().context("begin bulk delete")?;
        let mut changes = Vec::new();
        for (id, rev) in docs {
            let n = match rev {
                Some(rev) => tx.execute(
                    "DELETE FROM docs WHERE id = ?1 AND rev = ?2",
                    params![id, rev],
                )?,
                None => tx.execute("DELETE FROM docs WHERE id = ?1", params![id])?,
            };
            if n == 0 {
                debug!("bulk delete skipped {} (missing or stale revision)", id);
                continue;
            }
            tx.execute("DELETE FROM attachments WHERE doc_id = ?1", params![id])?;
            let seq = log_change(&tx, id, true)?;
            changes.push(Change {
                seq,
                id: id.clone(),
                deleted: true,
                doc: None,
            });
        }
        tx.commit().context("commit bulk delete")?;
        let deleted = changes.len();
        for change in changes {
            self.publish(change);
        }
        Ok(deleted)
    }

    fn list_page(&self, start_after: Option<&str>, limit: usize) -> Result<Vec<MediaRecord>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, rev, body FROM docs WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![start_after.unwrap_or(""), limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, rev, body) = row?;
            out.push(decode(&id, rev, &body)?);
        }
        Ok(out)
    }

    fn attachment(&self, id: &str, name: &str) -> Result<Option<Attachment>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT content_type, data FROM attachments WHERE doc_id = ?1 AND name = ?2",
            params![id, name],
            |row| {
                Ok(Attachment {
                    name: name.to_string(),
                    content_type: row.get(0)?,
                    data: row.get(1)?,
                })
            },
        )
        .optional()
        .context("read attachment")
    }

    fn update_seq(&self) -> Result<u64> {
        let conn = lock(&self.conn);
        let seq: Option<i64> = conn
            .query_row("SELECT MAX(seq) FROM changes", [], |row| row.get(0))
            .context("read update sequence")?;
        Ok(seq.unwrap_or(0).max(0) as u64)
    }

    fn subscribe(&self) -> Receiver<Change> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }
}
