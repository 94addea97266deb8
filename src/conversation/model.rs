//! Conversation and turn records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::stage::Stage;

/// Source channel of a conversation or turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Interview,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Interview => "interview",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "interview" => Ok(Self::Interview),
            other => Err(format!("unknown channel: '{other}'")),
        }
    }
}

/// Direction of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One immutable message in a conversation. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub direction: Direction,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Stage the conversation was in when this turn was recorded.
    pub stage_at_time: Stage,
}

impl Turn {
    pub fn inbound(channel: Channel, content: impl Into<String>, stage: Stage) -> Self {
        Self {
            direction: Direction::Inbound,
            channel,
            timestamp: Utc::now(),
            content: content.into(),
            stage_at_time: stage,
        }
    }

    pub fn outbound(channel: Channel, content: impl Into<String>, stage: Stage) -> Self {
        Self {
            direction: Direction::Outbound,
            channel,
            timestamp: Utc::now(),
            content: content.into(),
            stage_at_time: stage,
        }
    }
}

/// Details about the counterpart, filled in as they are extracted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counterpart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_arrangement: Option<String>,
}

impl Counterpart {
    /// Fold non-empty fields from `other` into self, keeping existing values.
    pub fn merge(&mut self, other: &Counterpart) {
        fn keep(slot: &mut Option<String>, incoming: &Option<String>) {
            if slot.is_none()
                && let Some(v) = incoming
                && !v.is_empty()
            {
                *slot = Some(v.clone());
            }
        }
        keep(&mut self.company, &other.company);
        keep(&mut self.contact, &other.contact);
        keep(&mut self.position, &other.position);
        keep(&mut self.salary_range, &other.salary_range);
        keep(&mut self.work_arrangement, &other.work_arrangement);
    }
}

/// The persisted record of one ongoing exchange with one counterpart.
///
/// `stage` changes only through the stage classifier; `history` is
/// append-only. The store enforces single-writer semantics per
/// `thread_id` via the `version` counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque, channel-stable identity.
    pub thread_id: String,
    pub channel: Channel,
    pub stage: Stage,
    pub counterpart: Counterpart,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub escalated: bool,
    /// Optimistic-concurrency version, bumped on every store write.
    #[serde(default)]
    pub version: i64,
}

impl Conversation {
    /// Create a new conversation in `initial_contact`.
    pub fn new(thread_id: impl Into<String>, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            channel,
            stage: Stage::InitialContact,
            counterpart: Counterpart::default(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            escalated: false,
            version: 0,
        }
    }

    /// Append a turn. History is append-only by construction — there is
    /// no API to remove or rewrite entries.
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push(turn);
        self.updated_at = Utc::now();
    }

    /// Apply a stage transition that the classifier has already validated.
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Recent turns for prompt context, oldest first.
    pub fn recent_turns(&self, limit: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}
