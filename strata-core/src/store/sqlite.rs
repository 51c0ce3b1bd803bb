//! SQLite-backed message and summary store.
//!
//! A single connection behind a mutex; every call runs on the blocking pool.
//! Summary inserts run in an IMMEDIATE transaction so the head check and the
//! insert see the same snapshot even when several processes share the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::info;

use super::{MessageStore, SummaryStore};
use crate::classifier::TopicComplexity;
use crate::error::{Result, StrataError};
use crate::model::{AppId, Message, MessageId, NewSummary, Role, Summary, SummaryId, SummaryTier};

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id      INTEGER NOT NULL,
    role        TEXT NOT NULL,
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_app ON messages(app_id, id);

CREATE TABLE IF NOT EXISTS summaries (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id             INTEGER NOT NULL,
    tier               TEXT NOT NULL CHECK (tier IN ('SHORT', 'MID', 'LONG')),
    text               TEXT NOT NULL,
    covered_from       INTEGER NOT NULL,
    covered_to         INTEGER NOT NULL,
    covered_count      INTEGER NOT NULL,
    original_tokens    INTEGER NOT NULL,
    summary_tokens     INTEGER NOT NULL,
    topic_complexity   TEXT,
    parent_summary_id  INTEGER REFERENCES summaries(id),
    embedding          TEXT,
    version            INTEGER NOT NULL DEFAULT 1,
    owner_user_id      INTEGER NOT NULL,
    created_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_app_tier ON summaries(app_id, tier, id);
";

const SUMMARY_COLUMNS: &str = "id, app_id, tier, text, covered_from, covered_to, covered_count, \
     original_tokens, summary_tokens, topic_complexity, parent_summary_id, embedding, version, \
     owner_user_id, created_at";

/// Durable store over one SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_TABLES)?;

        info!(path = %path.display(), "summary store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StrataError::Storage(format!("store task failed: {e}")))?
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so lexical order is chronological order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StrataError::DataInconsistency(format!("bad timestamp {raw:?}: {e}")))
}

type MessageColumns = (MessageId, AppId, String, String, String);

fn read_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_message(raw: MessageColumns) -> Result<Message> {
    let (id, app_id, role, text, created_at) = raw;
    Ok(Message {
        id,
        app_id,
        role: role.parse()?,
        text,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Columns as stored, before parsing enums, vectors and timestamps.
struct SummaryRow {
    id: SummaryId,
    app_id: AppId,
    tier: String,
    text: String,
    covered_from: MessageId,
    covered_to: MessageId,
    covered_count: u32,
    original_tokens: i64,
    summary_tokens: i64,
    topic_complexity: Option<String>,
    parent_summary_id: Option<SummaryId>,
    embedding: Option<String>,
    version: u32,
    owner_user_id: i64,
    created_at: String,
}

impl SummaryRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            app_id: row.get(1)?,
            tier: row.get(2)?,
            text: row.get(3)?,
            covered_from: row.get(4)?,
            covered_to: row.get(5)?,
            covered_count: row.get(6)?,
            original_tokens: row.get(7)?,
            summary_tokens: row.get(8)?,
            topic_complexity: row.get(9)?,
            parent_summary_id: row.get(10)?,
            embedding: row.get(11)?,
            version: row.get(12)?,
            owner_user_id: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn into_summary(self) -> Result<Summary> {
        let topic_complexity = self
            .topic_complexity
            .as_deref()
            .map(str::parse::<TopicComplexity>)
            .transpose()?;
        let embedding = self
            .embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()?;
        Ok(Summary {
            id: self.id,
            app_id: self.app_id,
            tier: self.tier.parse()?,
            text: self.text,
            covered_from: self.covered_from,
            covered_to: self.covered_to,
            covered_count: self.covered_count,
            original_tokens: self.original_tokens.max(0) as usize,
            summary_tokens: self.summary_tokens.max(0) as usize,
            topic_complexity,
            parent_summary_id: self.parent_summary_id,
            embedding,
            version: self.version,
            owner_user_id: self.owner_user_id,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn query_summaries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Summary>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, SummaryRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(SummaryRow::into_summary).collect()
}

fn query_summary(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Summary>> {
    conn.query_row(sql, params, SummaryRow::read)
        .optional()?
        .map(SummaryRow::into_summary)
        .transpose()
}

fn latest_sql() -> String {
    format!(
        "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE app_id = ?1 AND tier = ?2 \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    )
}

fn encode_embedding(embedding: &Option<Vec<f32>>) -> Result<Option<String>> {
    Ok(embedding.as_ref().map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, app_id: AppId, role: Role, text: &str) -> Result<Message> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            // Stored at microsecond precision; return what a read will see.
            let created_at = Utc::now().trunc_subsecs(6);
            conn.execute(
                "INSERT INTO messages (app_id, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![app_id, role.as_str(), text, timestamp(created_at)],
            )?;
            Ok(Message {
                id: conn.last_insert_rowid(),
                app_id,
                role,
                text,
                created_at,
            })
        })
        .await
    }

    async fn recent(&self, app_id: AppId, limit: usize) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, app_id, role, text, created_at FROM messages \
                 WHERE app_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let raw = stmt
                .query_map(params![app_id, limit as i64], read_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut messages = raw.into_iter().map(into_message).collect::<Result<Vec<_>>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn after(&self, app_id: AppId, after: Option<MessageId>) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, app_id, role, text, created_at FROM messages \
                 WHERE app_id = ?1 AND id > ?2 ORDER BY id ASC",
            )?;
            let raw = stmt
                .query_map(params![app_id, after.unwrap_or(MessageId::MIN)], read_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(into_message).collect()
        })
        .await
    }

    async fn count_after(&self, app_id: AppId, after: Option<MessageId>) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE app_id = ?1 AND id > ?2",
                params![app_id, after.unwrap_or(MessageId::MIN)],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn latest(&self, app_id: AppId, tier: SummaryTier) -> Result<Option<Summary>> {
        self.with_conn(move |conn| {
            query_summary(conn, &latest_sql(), params![app_id, tier.as_str()])
        })
        .await
    }

    async fn unmerged(
        &self,
        app_id: AppId,
        tier: SummaryTier,
        after: Option<SummaryId>,
    ) -> Result<Vec<Summary>> {
        self.with_conn(move |conn| {
            query_summaries(
                conn,
                &format!(
                    "SELECT {SUMMARY_COLUMNS} FROM summaries \
                     WHERE app_id = ?1 AND tier = ?2 AND id > ?3 ORDER BY id ASC"
                ),
                params![app_id, tier.as_str(), after.unwrap_or(SummaryId::MIN)],
            )
        })
        .await
    }

    async fn get(&self, app_id: AppId, id: SummaryId) -> Result<Option<Summary>> {
        self.with_conn(move |conn| {
            query_summary(
                conn,
                &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE app_id = ?1 AND id = ?2"),
                params![app_id, id],
            )
        })
        .await
    }

    async fn save(&self, summary: NewSummary) -> Result<Summary> {
        summary.check_shape()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let head: Option<SummaryId> = tx
                .query_row(
                    "SELECT id FROM summaries WHERE app_id = ?1 AND tier = ?2 \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![summary.app_id, summary.tier.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if head != summary.expected_head {
                return Err(StrataError::HeadConflict {
                    app_id: summary.app_id,
                    tier: summary.tier,
                    expected: summary.expected_head,
                    found: head,
                });
            }

            let parent = match summary.parent_summary_id {
                Some(id) => query_summary(
                    &tx,
                    &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1"),
                    params![id],
                )?,
                None => None,
            };
            summary.check_parent(parent.as_ref())?;

            let created_at = Utc::now().trunc_subsecs(6);
            tx.execute(
                "INSERT INTO summaries (app_id, tier, text, covered_from, covered_to, covered_count, \
                 original_tokens, summary_tokens, topic_complexity, parent_summary_id, embedding, \
                 version, owner_user_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?13)",
                params![
                    summary.app_id,
                    summary.tier.as_str(),
                    summary.text,
                    summary.covered_from,
                    summary.covered_to,
                    summary.covered_count,
                    summary.original_tokens as i64,
                    summary.summary_tokens as i64,
                    summary.topic_complexity.map(|c| c.as_str()),
                    summary.parent_summary_id,
                    encode_embedding(&summary.embedding)?,
                    summary.owner_user_id,
                    timestamp(created_at),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(summary.into_summary(id, created_at))
        })
        .await
    }

    async fn update(&self, summary: &Summary) -> Result<Summary> {
        let summary = summary.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE summaries SET embedding = ?1, version = version + 1 \
                 WHERE id = ?2 AND app_id = ?3 AND version = ?4",
                params![
                    encode_embedding(&summary.embedding)?,
                    summary.id,
                    summary.app_id,
                    summary.version
                ],
            )?;

            let stored = query_summary(
                conn,
                &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE app_id = ?1 AND id = ?2"),
                params![summary.app_id, summary.id],
            )?
            .ok_or_else(|| {
                StrataError::DataInconsistency(format!(
                    "summary {} of app {} does not exist",
                    summary.id, summary.app_id
                ))
            })?;

            if changed == 0 {
                return Err(StrataError::VersionConflict {
                    summary_id: summary.id,
                    expected: summary.version,
                    found: stored.version,
                });
            }
            Ok(stored)
        })
        .await
    }

    async fn all(&self, app_id: AppId) -> Result<Vec<Summary>> {
        self.with_conn(move |conn| {
            query_summaries(
                conn,
                &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE app_id = ?1 ORDER BY id ASC"),
                params![app_id],
            )
        })
        .await
    }
}
