//! Escalation gate — the human stays in the loop for anything binding.
//!
//! The gate runs after classification and before any reply goes out. It
//! never mutates conversation state; it only decides whether the event
//! (and any generated draft) is held for review. Money and commitments
//! always escalate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::conversation::Stage;
use crate::signals::{ContentSignal, Detection};

/// Why an event was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// A final offer with concrete terms arrived.
    Offer,
    /// Rate or salary discussion is in play.
    Negotiation,
    /// Interview scheduling needs a human commitment.
    Scheduling,
    /// A coding exercise or assessment was requested.
    TechnicalAssessment,
    /// The classifier could not confidently read the event.
    Ambiguous,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Negotiation => "negotiation",
            Self::Scheduling => "scheduling",
            Self::TechnicalAssessment => "technical_assessment",
            Self::Ambiguous => "ambiguous",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EscalationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(Self::Offer),
            "negotiation" => Ok(Self::Negotiation),
            "scheduling" => Ok(Self::Scheduling),
            "technical_assessment" => Ok(Self::TechnicalAssessment),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(format!("unknown escalation reason: '{other}'")),
        }
    }
}

/// Outcome of the gate for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The pipeline may auto-reply.
    Proceed,
    /// Hold for human review.
    Escalate(EscalationReason),
}

impl GateDecision {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalate(_))
    }
}

/// A persisted review item for the human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub thread_id: String,
    pub reason: EscalationReason,
    /// Short excerpt of the triggering content.
    pub excerpt: String,
    /// Structured context: detected signals, suppressed draft, etc.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

impl EscalationRecord {
    pub fn new(
        thread_id: impl Into<String>,
        reason: EscalationReason,
        content: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            reason,
            excerpt: excerpt(content, 240),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            resolved: false,
        }
    }

    /// Attach the reply that was generated but held back. The draft
    /// lives here, never in the conversation history — history records
    /// only what was actually said.
    pub fn with_suppressed_draft(mut self, draft: &str) -> Self {
        self.payload["suppressed_draft"] = serde_json::Value::String(draft.to_string());
        self
    }

    pub fn with_signals(mut self, detection: &Detection) -> Self {
        let labels: Vec<&str> = detection.signals.iter().map(|s| s.label()).collect();
        self.payload["signals"] = serde_json::json!(labels);
        self.payload["confidence"] = serde_json::json!(detection.confidence);
        self
    }

    pub fn suppressed_draft(&self) -> Option<&str> {
        self.payload.get("suppressed_draft").and_then(|v| v.as_str())
    }
}

fn excerpt(content: &str, max: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Decides whether an event requires human review.
pub struct EscalationGate {
    config: GateConfig,
}

impl EscalationGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Gate one classified event.
    ///
    /// `next_stage` is the classifier's outcome for this event. Stage
    /// mutation has already been decided elsewhere; the gate only reads.
    pub fn decide(&self, next_stage: Stage, detection: &Detection) -> GateDecision {
        if detection
            .signals
            .iter()
            .any(|s| matches!(s, ContentSignal::FinalOffer))
        {
            return GateDecision::Escalate(EscalationReason::Offer);
        }

        // Negotiation and scheduling stages escalate unconditionally,
        // whatever the triggering signal was.
        if next_stage == Stage::Negotiation
            || detection
                .signals
                .iter()
                .any(|s| matches!(s, ContentSignal::Negotiation))
        {
            return GateDecision::Escalate(EscalationReason::Negotiation);
        }
        if next_stage == Stage::Scheduling {
            return GateDecision::Escalate(EscalationReason::Scheduling);
        }

        if detection
            .signals
            .iter()
            .any(|s| matches!(s, ContentSignal::TechnicalAssessment))
        {
            return GateDecision::Escalate(EscalationReason::TechnicalAssessment);
        }

        // Plain chatter (no signal at all) proceeds. Low confidence on a
        // reported signal means the detector was unsure of its own read,
        // and that goes to a human.
        if !detection.signals.is_empty()
            && detection.confidence < self.config.ambiguous_confidence_threshold
        {
            return GateDecision::Escalate(EscalationReason::Ambiguous);
        }

        GateDecision::Proceed
    }

    /// Gate an event the pipeline failed to process (dead letter).
    pub fn decide_failed(&self) -> GateDecision {
        GateDecision::Escalate(EscalationReason::Ambiguous)
    }
}

impl Default for EscalationGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}
