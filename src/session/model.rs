//! Interview session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one automated interview run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no browser activity yet.
    Pending,
    /// Acquiring a lease and opening the page.
    Opening,
    /// Waiting for the page to settle.
    Navigating,
    /// Reading the page for questions or code.
    Extracting,
    /// A question was found; an answer is being produced or reviewed.
    AwaitingAnswer,
    /// The answer was submitted.
    Answered,
    /// Finished cleanly.
    Closed,
    /// Finished with an unrecoverable failure.
    Error,
}

impl SessionStatus {
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;

        match self {
            Closed => return false,
            // A failed session can still be closed out.
            Error => return target == Closed,
            _ => {}
        }

        matches!(
            (self, target),
            // Any live status may error out or be closed.
            (_, Error) | (_, Closed) |
            (Pending, Opening) |
            (Opening, Navigating) |
            (Navigating, Extracting) |
            (Extracting, AwaitingAnswer) |
            (AwaitingAnswer, Answered) |
            // After submitting, look for the next question.
            (Answered, Extracting)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Opening => "opening",
            Self::Navigating => "navigating",
            Self::Extracting => "extracting",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::Answered => "answered",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "opening" => Ok(Self::Opening),
            "navigating" => Ok(Self::Navigating),
            "extracting" => Ok(Self::Extracting),
            "awaiting_answer" => Ok(Self::AwaitingAnswer),
            "answered" => Ok(Self::Answered),
            "closed" => Ok(Self::Closed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status: '{other}'")),
        }
    }
}

/// One question/answer pair from a session.
///
/// Appended before submission is attempted, so the log survives a
/// submit failure and the human can see what was about to go out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaEntry {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
    pub submitted: bool,
}

/// Persisted state of one interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSession {
    pub session_id: Uuid,
    /// Conversation this session belongs to.
    pub thread_id: String,
    pub url: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    pub qa_log: Vec<QaEntry>,
    /// Opaque reference to the most recent screenshot, when the driver
    /// captures them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_screenshot_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub headless: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl InterviewSession {
    pub fn new(thread_id: impl Into<String>, url: impl Into<String>, headless: bool) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            url: url.into(),
            status: SessionStatus::Pending,
            company: None,
            position: None,
            qa_log: Vec::new(),
            last_screenshot_ref: None,
            error: None,
            headless,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Advance the status if the edge is legal; returns whether it moved.
    pub fn advance(&mut self, target: SessionStatus) -> bool {
        if self.status.can_transition_to(target) {
            self.status = target;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Record a failure and move to `Error`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.status = SessionStatus::Error;
        self.updated_at = Utc::now();
    }

    /// Append a Q/A pair, not yet submitted.
    pub fn log_answer(
        &mut self,
        question: impl Into<String>,
        code_snippet: Option<String>,
        answer: impl Into<String>,
    ) {
        self.qa_log.push(QaEntry {
            question: question.into(),
            code_snippet,
            answer: answer.into(),
            answered_at: Utc::now(),
            submitted: false,
        });
        self.updated_at = Utc::now();
    }

    /// Mark the most recent Q/A entry as submitted.
    pub fn mark_last_submitted(&mut self) {
        if let Some(entry) = self.qa_log.last_mut() {
            entry.submitted = true;
            self.updated_at = Utc::now();
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
