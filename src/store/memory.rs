//! In-memory store for tests and ephemeral runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::StoreError;
use crate::escalation::EscalationRecord;
use crate::session::InterviewSession;
use crate::store::traits::{DeadLetter, Store};

#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    sessions: RwLock<HashMap<Uuid, InterviewSession>>,
    escalations: RwLock<Vec<EscalationRecord>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    seen_events: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_conversation(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.read().await.get(thread_id).cloned())
    }

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<i64, StoreError> {
        let mut map = self.conversations.write().await;
        let stored_version = map
            .get(&conversation.thread_id)
            .map(|c| c.version)
            .unwrap_or(0);
        if stored_version != conversation.version {
            return Err(StoreError::Conflict {
                entity: "conversation".to_string(),
                id: conversation.thread_id.clone(),
                expected: conversation.version,
            });
        }
        let mut next = conversation.clone();
        next.version += 1;
        let version = next.version;
        map.insert(conversation.thread_id.clone(), next);
        Ok(version)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut all: Vec<Conversation> =
            self.conversations.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<InterviewSession>, StoreError> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn save_session(&self, session: &InterviewSession) -> Result<i64, StoreError> {
        let mut map = self.sessions.write().await;
        let stored_version = map
            .get(&session.session_id)
            .map(|s| s.version)
            .unwrap_or(0);
        if stored_version != session.version {
            return Err(StoreError::Conflict {
                entity: "interview_session".to_string(),
                id: session.session_id.to_string(),
                expected: session.version,
            });
        }
        let mut next = session.clone();
        next.version += 1;
        let version = next.version;
        map.insert(session.session_id, next);
        Ok(version)
    }

    async fn active_session_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<InterviewSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut live: Vec<&InterviewSession> = sessions
            .values()
            .filter(|s| s.thread_id == thread_id && !s.is_terminal())
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(live.first().map(|s| (*s).clone()))
    }

    async fn insert_escalation(&self, record: &EscalationRecord) -> Result<(), StoreError> {
        self.escalations.write().await.push(record.clone());
        Ok(())
    }

    async fn open_escalations(&self) -> Result<Vec<EscalationRecord>, StoreError> {
        Ok(self
            .escalations
            .read()
            .await
            .iter()
            .filter(|r| !r.resolved)
            .cloned()
            .collect())
    }

    async fn resolve_escalation(&self, id: Uuid) -> Result<(), StoreError> {
        let mut list = self.escalations.write().await;
        match list.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.resolved = true;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "escalation".to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.dead_letters.write().await.push(letter.clone());
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.dead_letters.read().await.clone())
    }

    async fn mark_event_seen(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.seen_events.write().await.insert(event_id.to_string()))
    }
}
