//! Stage classifier — maps detected signals onto the next stage.
//!
//! Pure with respect to state: it reads the current stage and the
//! detector output, and returns the next stage plus any session-spawn
//! request. Side effects (persisting, spawning the interview session)
//! belong to the orchestrator.
//!
//! Signal priority when several match at once:
//! decline > offer/negotiation > interview link or scheduling >
//! screening question > default (stay in `information_gathering`).

use tracing::debug;

use crate::conversation::stage::Stage;
use crate::error::ClassificationError;
use crate::signals::{ContentSignal, Detection};

/// Result of classifying one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutcome {
    pub next_stage: Stage,
    /// Set when an interview link should spawn (or reuse) a session.
    /// The `scheduling → interviewing` edge is the only session-spawning
    /// transition; the orchestrator performs it after this outcome.
    pub interview_url: Option<String>,
}

/// Deterministic stage classifier.
pub struct StageClassifier;

impl StageClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one event against the current stage.
    ///
    /// Errors if the conversation is in a terminal stage — terminal
    /// conversations accept no events and cannot be re-opened.
    pub fn classify(
        &self,
        thread_id: &str,
        current: Stage,
        detection: &Detection,
    ) -> Result<ClassifierOutcome, ClassificationError> {
        if current.is_terminal() {
            return Err(ClassificationError::TerminalStage {
                thread_id: thread_id.to_string(),
                stage: current.to_string(),
            });
        }

        let (target, interview_url) = self.target_for(current, detection);

        // An illegal edge degrades to staying put rather than corrupting
        // the stage graph (e.g. a screening question mid-interview).
        let next_stage = if current.can_transition_to(target) {
            target
        } else {
            debug!(
                thread_id = %thread_id,
                current = %current,
                rejected = %target,
                "Signal target not reachable from current stage; holding"
            );
            current
        };

        Ok(ClassifierOutcome {
            next_stage,
            interview_url,
        })
    }

    /// Apply the signal priority order to pick a target stage.
    fn target_for(&self, current: Stage, detection: &Detection) -> (Stage, Option<String>) {
        let signals = &detection.signals;

        if signals.iter().any(|s| matches!(s, ContentSignal::Decline)) {
            return (Stage::Declined, None);
        }

        if signals
            .iter()
            .any(|s| matches!(s, ContentSignal::FinalOffer | ContentSignal::Negotiation))
        {
            return (Stage::Negotiation, None);
        }

        if let Some(url) = detection.interview_url() {
            return (Stage::Scheduling, Some(url.to_string()));
        }

        if signals.iter().any(|s| matches!(s, ContentSignal::Scheduling)) {
            return (Stage::Scheduling, None);
        }

        if signals
            .iter()
            .any(|s| matches!(s, ContentSignal::ScreeningQuestion | ContentSignal::TechnicalAssessment))
        {
            return (Stage::Screening, None);
        }

        // Default: first contact advances to information gathering,
        // everything else stays where it is.
        let fallback = match current {
            Stage::InitialContact => Stage::InformationGathering,
            other => other,
        };
        (fallback, None)
    }
}

impl Default for StageClassifier {
    fn default() -> Self {
        Self::new()
    }
}
