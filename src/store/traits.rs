//! Backend-agnostic store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::StoreError;
use crate::escalation::EscalationRecord;
use crate::session::InterviewSession;

/// An inbound event the pipeline gave up on, parked for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub thread_id: String,
    /// The serialized event, replayable after a fix.
    pub event: serde_json::Value,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        thread_id: impl Into<String>,
        event: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            event,
            error: error.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persistence surface for the whole pipeline.
///
/// Writes to versioned entities (conversations, sessions) are guarded
/// by optimistic concurrency: the caller passes the version it read,
/// and a mismatch fails with [`StoreError::Conflict`]. Callers re-read
/// and retry once before escalating.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Conversations ───────────────────────────────────────────────

    async fn get_conversation(&self, thread_id: &str)
    -> Result<Option<Conversation>, StoreError>;

    /// Insert or update a conversation. The write succeeds only when
    /// the stored version equals `conversation.version`; the returned
    /// value is the new version to carry forward.
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<i64, StoreError>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    // ── Interview sessions ──────────────────────────────────────────

    async fn get_session(&self, session_id: Uuid)
    -> Result<Option<InterviewSession>, StoreError>;

    /// Versioned write, same contract as `upsert_conversation`.
    async fn save_session(&self, session: &InterviewSession) -> Result<i64, StoreError>;

    /// The non-terminal session for a thread, if one exists. At most
    /// one session per thread is ever live.
    async fn active_session_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<InterviewSession>, StoreError>;

    // ── Escalations ─────────────────────────────────────────────────

    async fn insert_escalation(&self, record: &EscalationRecord) -> Result<(), StoreError>;

    async fn open_escalations(&self) -> Result<Vec<EscalationRecord>, StoreError>;

    async fn resolve_escalation(&self, id: Uuid) -> Result<(), StoreError>;

    // ── Dead letters ────────────────────────────────────────────────

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    // ── Event dedupe ────────────────────────────────────────────────

    /// Record an event ID. Returns `true` the first time it is seen,
    /// `false` on replay — the caller skips already-processed events.
    async fn mark_event_seen(&self, event_id: &str) -> Result<bool, StoreError>;
}
