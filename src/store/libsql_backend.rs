//! libSQL-backed store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::{Conversation, Turn, model::Counterpart};
use crate::error::StoreError;
use crate::escalation::{EscalationReason, EscalationRecord};
use crate::session::InterviewSession;
use crate::store::migrations::run_migrations;
use crate::store::traits::{DeadLetter, Store};

pub struct LibsqlStore {
    _db: Arc<libsql::Database>,
    conn: Connection,
}

impl LibsqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            _db: Arc::new(db),
            conn,
        })
    }

    /// In-memory database for tests.
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        run_migrations(&conn).await?;
        Ok(Self {
            _db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_turns(&self, thread_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT direction, channel, content, stage_at_time, timestamp
                 FROM turns WHERE thread_id = ?1 ORDER BY position",
                params![thread_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_turns: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_turns: {e}")))?
        {
            turns.push(row_to_turn(&row)?);
        }
        Ok(turns)
    }

    async fn turn_count(&self, thread_id: &str) -> Result<usize, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM turns WHERE thread_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("turn_count: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("turn_count: {e}")))?;
        match row {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("turn_count: {e}")))?;
                Ok(count as usize)
            }
            None => Ok(0),
        }
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn parse_datetime(s: &str, what: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad {what} timestamp '{s}': {e}")))
}

fn parse_field<T: std::str::FromStr>(s: &str, what: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| StoreError::Serialization(format!("bad {what} '{s}': {e}")))
}

fn row_to_turn(row: &Row) -> Result<Turn, StoreError> {
    let direction: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("turn direction: {e}")))?;
    let channel: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("turn channel: {e}")))?;
    let content: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("turn content: {e}")))?;
    let stage: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("turn stage: {e}")))?;
    let timestamp: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("turn timestamp: {e}")))?;

    Ok(Turn {
        direction: serde_json::from_value(serde_json::Value::String(direction))
            .map_err(|e| StoreError::Serialization(format!("bad direction: {e}")))?,
        channel: parse_field(&channel, "channel")?,
        timestamp: parse_datetime(&timestamp, "turn")?,
        content,
        stage_at_time: parse_field(&stage, "stage")?,
    })
}

fn row_to_conversation(row: &Row) -> Result<Conversation, StoreError> {
    let thread_id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("conversation id: {e}")))?;
    let channel: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("conversation channel: {e}")))?;
    let stage: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("conversation stage: {e}")))?;
    let counterpart_json: String = row.get(3).unwrap_or_else(|_| "{}".to_string());
    let escalated: i64 = row.get(4).unwrap_or(0);
    let created_at: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("conversation created_at: {e}")))?;
    let updated_at: String = row
        .get(6)
        .map_err(|e| StoreError::Query(format!("conversation updated_at: {e}")))?;
    let version: i64 = row.get(7).unwrap_or(0);

    let counterpart: Counterpart = serde_json::from_str(&counterpart_json)
        .map_err(|e| StoreError::Serialization(format!("bad counterpart: {e}")))?;

    Ok(Conversation {
        thread_id,
        channel: parse_field(&channel, "channel")?,
        stage: parse_field(&stage, "stage")?,
        counterpart,
        history: Vec::new(),
        created_at: parse_datetime(&created_at, "conversation")?,
        updated_at: parse_datetime(&updated_at, "conversation")?,
        escalated: escalated != 0,
        version,
    })
}

fn row_to_session(row: &Row) -> Result<InterviewSession, StoreError> {
    let session_id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("session id: {e}")))?;
    let thread_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("session thread: {e}")))?;
    let url: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("session url: {e}")))?;
    let status: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("session status: {e}")))?;
    let company: Option<String> = row.get(4).ok();
    let position: Option<String> = row.get(5).ok();
    let qa_log_json: String = row.get(6).unwrap_or_else(|_| "[]".to_string());
    let last_screenshot_ref: Option<String> = row.get(7).ok();
    let error: Option<String> = row.get(8).ok();
    let headless: i64 = row.get(9).unwrap_or(0);
    let created_at: String = row
        .get(10)
        .map_err(|e| StoreError::Query(format!("session created_at: {e}")))?;
    let updated_at: String = row
        .get(11)
        .map_err(|e| StoreError::Query(format!("session updated_at: {e}")))?;
    let version: i64 = row.get(12).unwrap_or(0);

    Ok(InterviewSession {
        session_id: Uuid::parse_str(&session_id)
            .map_err(|e| StoreError::Serialization(format!("bad session id: {e}")))?,
        thread_id,
        url,
        status: parse_field(&status, "status")?,
        company,
        position,
        qa_log: serde_json::from_str(&qa_log_json)
            .map_err(|e| StoreError::Serialization(format!("bad qa_log: {e}")))?,
        last_screenshot_ref,
        error,
        headless: headless != 0,
        created_at: parse_datetime(&created_at, "session")?,
        updated_at: parse_datetime(&updated_at, "session")?,
        version,
    })
}

fn row_to_escalation(row: &Row) -> Result<EscalationRecord, StoreError> {
    let id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("escalation id: {e}")))?;
    let thread_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("escalation thread: {e}")))?;
    let reason: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("escalation reason: {e}")))?;
    let excerpt: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("escalation excerpt: {e}")))?;
    let payload: String = row.get(4).unwrap_or_else(|_| "{}".to_string());
    let created_at: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("escalation created_at: {e}")))?;
    let resolved: i64 = row.get(6).unwrap_or(0);

    let reason: EscalationReason = parse_field(&reason, "reason")?;
    Ok(EscalationRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| StoreError::Serialization(format!("bad escalation id: {e}")))?,
        thread_id,
        reason,
        excerpt,
        payload: serde_json::from_str(&payload)
            .map_err(|e| StoreError::Serialization(format!("bad payload: {e}")))?,
        created_at: parse_datetime(&created_at, "escalation")?,
        resolved: resolved != 0,
    })
}

fn direction_str(turn: &Turn) -> &'static str {
    match turn.direction {
        crate::conversation::Direction::Inbound => "inbound",
        crate::conversation::Direction::Outbound => "outbound",
    }
}

const CONVERSATION_COLUMNS: &str =
    "thread_id, channel, stage, counterpart, escalated, created_at, updated_at, version";
const SESSION_COLUMNS: &str =
    "session_id, thread_id, url, status, company, position, qa_log, last_screenshot_ref, error, headless, created_at, updated_at, version";

#[async_trait]
impl Store for LibsqlStore {
    async fn get_conversation(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE thread_id = ?1"),
                params![thread_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_conversation: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_conversation: {e}")))?;
        match row {
            Some(row) => {
                let mut conversation = row_to_conversation(&row)?;
                conversation.history = self.load_turns(thread_id).await?;
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<i64, StoreError> {
        let conn = self.conn();
        let counterpart = serde_json::to_string(&conversation.counterpart)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let new_version = conversation.version + 1;

        if conversation.version == 0 {
            let result = conn
                .execute(
                    &format!(
                        "INSERT INTO conversations ({CONVERSATION_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![
                        conversation.thread_id.as_str(),
                        conversation.channel.to_string(),
                        conversation.stage.to_string(),
                        counterpart,
                        conversation.escalated as i64,
                        conversation.created_at.to_rfc3339(),
                        conversation.updated_at.to_rfc3339(),
                        new_version,
                    ],
                )
                .await;
            if let Err(e) = result {
                let message = e.to_string();
                if message.contains("UNIQUE") {
                    return Err(StoreError::Conflict {
                        entity: "conversation".to_string(),
                        id: conversation.thread_id.clone(),
                        expected: conversation.version,
                    });
                }
                return Err(StoreError::Query(format!("upsert_conversation: {message}")));
            }
        } else {
            let affected = conn
                .execute(
                    "UPDATE conversations
                     SET channel = ?1, stage = ?2, counterpart = ?3, escalated = ?4,
                         updated_at = ?5, version = ?6
                     WHERE thread_id = ?7 AND version = ?8",
                    params![
                        conversation.channel.to_string(),
                        conversation.stage.to_string(),
                        counterpart,
                        conversation.escalated as i64,
                        conversation.updated_at.to_rfc3339(),
                        new_version,
                        conversation.thread_id.as_str(),
                        conversation.version,
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("upsert_conversation: {e}")))?;
            if affected == 0 {
                return Err(StoreError::Conflict {
                    entity: "conversation".to_string(),
                    id: conversation.thread_id.clone(),
                    expected: conversation.version,
                });
            }
        }

        // History is append-only: persist only turns past the stored count.
        let existing = self.turn_count(&conversation.thread_id).await?;
        for (offset, turn) in conversation.history.iter().skip(existing).enumerate() {
            conn.execute(
                "INSERT INTO turns (thread_id, position, direction, channel, content, stage_at_time, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.thread_id.as_str(),
                    (existing + offset) as i64,
                    direction_str(turn),
                    turn.channel.to_string(),
                    turn.content.as_str(),
                    turn.stage_at_time.to_string(),
                    turn.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_turn: {e}")))?;
        }

        debug!(thread_id = %conversation.thread_id, version = new_version, "Conversation saved");
        Ok(new_version)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY updated_at DESC"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_conversations: {e}")))?;

        let mut all = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_conversations: {e}")))?
        {
            all.push(row_to_conversation(&row)?);
        }
        Ok(all)
    }

    async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<InterviewSession>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM interview_sessions WHERE session_id = ?1"),
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn save_session(&self, session: &InterviewSession) -> Result<i64, StoreError> {
        let conn = self.conn();
        let qa_log = serde_json::to_string(&session.qa_log)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let new_version = session.version + 1;

        if session.version == 0 {
            let result = conn
                .execute(
                    &format!(
                        "INSERT INTO interview_sessions ({SESSION_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                    ),
                    params![
                        session.session_id.to_string(),
                        session.thread_id.as_str(),
                        session.url.as_str(),
                        session.status.to_string(),
                        opt_text(&session.company),
                        opt_text(&session.position),
                        qa_log,
                        opt_text(&session.last_screenshot_ref),
                        opt_text(&session.error),
                        session.headless as i64,
                        session.created_at.to_rfc3339(),
                        session.updated_at.to_rfc3339(),
                        new_version,
                    ],
                )
                .await;
            if let Err(e) = result {
                let message = e.to_string();
                if message.contains("UNIQUE") {
                    return Err(StoreError::Conflict {
                        entity: "interview_session".to_string(),
                        id: session.session_id.to_string(),
                        expected: session.version,
                    });
                }
                return Err(StoreError::Query(format!("save_session: {message}")));
            }
        } else {
            let affected = conn
                .execute(
                    "UPDATE interview_sessions
                     SET status = ?1, company = ?2, position = ?3, qa_log = ?4,
                         last_screenshot_ref = ?5, error = ?6,
                         updated_at = ?7, version = ?8
                     WHERE session_id = ?9 AND version = ?10",
                    params![
                        session.status.to_string(),
                        opt_text(&session.company),
                        opt_text(&session.position),
                        qa_log,
                        opt_text(&session.last_screenshot_ref),
                        opt_text(&session.error),
                        session.updated_at.to_rfc3339(),
                        new_version,
                        session.session_id.to_string(),
                        session.version,
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("save_session: {e}")))?;
            if affected == 0 {
                return Err(StoreError::Conflict {
                    entity: "interview_session".to_string(),
                    id: session.session_id.to_string(),
                    expected: session.version,
                });
            }
        }

        Ok(new_version)
    }

    async fn active_session_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<InterviewSession>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM interview_sessions
                     WHERE thread_id = ?1 AND status NOT IN ('closed', 'error')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![thread_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("active_session_for_thread: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("active_session_for_thread: {e}")))?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn insert_escalation(&self, record: &EscalationRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO escalations (id, thread_id, reason, excerpt, payload, created_at, resolved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.thread_id.as_str(),
                    record.reason.to_string(),
                    record.excerpt.as_str(),
                    payload,
                    record.created_at.to_rfc3339(),
                    record.resolved as i64,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_escalation: {e}")))?;
        Ok(())
    }

    async fn open_escalations(&self) -> Result<Vec<EscalationRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, thread_id, reason, excerpt, payload, created_at, resolved
                 FROM escalations WHERE resolved = 0 ORDER BY created_at",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("open_escalations: {e}")))?;

        let mut all = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("open_escalations: {e}")))?
        {
            all.push(row_to_escalation(&row)?);
        }
        Ok(all)
    }

    async fn resolve_escalation(&self, id: Uuid) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE escalations SET resolved = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("resolve_escalation: {e}")))?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "escalation".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let event = serde_json::to_string(&letter.event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO dead_letters (id, thread_id, event, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    letter.id.to_string(),
                    letter.thread_id.as_str(),
                    event,
                    letter.error.as_str(),
                    letter.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_dead_letter: {e}")))?;
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, thread_id, event, error, created_at FROM dead_letters ORDER BY created_at",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("dead_letters: {e}")))?;

        let mut all = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("dead_letters: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("dead_letter id: {e}")))?;
            let thread_id: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("dead_letter thread: {e}")))?;
            let event: String = row
                .get(2)
                .map_err(|e| StoreError::Query(format!("dead_letter event: {e}")))?;
            let error: String = row
                .get(3)
                .map_err(|e| StoreError::Query(format!("dead_letter error: {e}")))?;
            let created_at: String = row
                .get(4)
                .map_err(|e| StoreError::Query(format!("dead_letter created_at: {e}")))?;

            all.push(DeadLetter {
                id: Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Serialization(format!("bad dead letter id: {e}")))?,
                thread_id,
                event: serde_json::from_str(&event)
                    .map_err(|e| StoreError::Serialization(format!("bad event json: {e}")))?,
                error,
                created_at: parse_datetime(&created_at, "dead_letter")?,
            });
        }
        Ok(all)
    }

    async fn mark_event_seen(&self, event_id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO processed_events (event_id, seen_at) VALUES (?1, ?2)",
                params![event_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_event_seen: {e}")))?;
        Ok(affected == 1)
    }
}

/// Convert `&Option<String>` to a libsql value.
fn opt_text(s: &Option<String>) -> libsql::Value {
    match s {
        Some(text) => libsql::Value::Text(text.clone()),
        None => libsql::Value::Null,
    }
}
