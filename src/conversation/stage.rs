//! Conversation stage state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a recruiter conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// First inbound contact, nothing known yet.
    InitialContact,
    /// Default working stage — collecting role/company details.
    InformationGathering,
    /// Answering recruiter screening questions.
    Screening,
    /// Rates or offer terms are on the table.
    Negotiation,
    /// An interview is being arranged.
    Scheduling,
    /// An automated interview session is active.
    Interviewing,
    /// Candidate or recruiter declined.
    Declined,
    /// Conversation explicitly closed.
    Closed,
}

impl Stage {
    /// Check if this stage allows transitioning to another stage.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;

        if self.is_terminal() {
            return false;
        }
        if *self == target {
            // Self-transitions are always legal (event replay, no-op classify).
            return true;
        }

        matches!(
            (self, target),
            // Any live stage may decline or close.
            (_, Declined) | (_, Closed) |
            // Forward flow
            (InitialContact, InformationGathering) |
            (InitialContact, Screening) |
            (InformationGathering, Screening) |
            (InformationGathering, Negotiation) |
            (InformationGathering, Scheduling) |
            (Screening, Negotiation) |
            (Screening, Scheduling) |
            (Screening, InformationGathering) |
            (Negotiation, Scheduling) |
            (Negotiation, InformationGathering) |
            (Scheduling, Interviewing) |
            (Scheduling, Negotiation) |
            (Interviewing, Scheduling) |
            (Interviewing, Negotiation) |
            // A direct interview link can arrive early.
            (InitialContact, Scheduling)
        )
    }

    /// Terminal stages accept no further events; re-opening is disallowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Closed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InitialContact => "initial_contact",
            Self::InformationGathering => "information_gathering",
            Self::Screening => "screening",
            Self::Negotiation => "negotiation",
            Self::Scheduling => "scheduling",
            Self::Interviewing => "interviewing",
            Self::Declined => "declined",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial_contact" => Ok(Self::InitialContact),
            "information_gathering" => Ok(Self::InformationGathering),
            "screening" => Ok(Self::Screening),
            "negotiation" => Ok(Self::Negotiation),
            "scheduling" => Ok(Self::Scheduling),
            "interviewing" => Ok(Self::Interviewing),
            "declined" => Ok(Self::Declined),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown stage: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_valid() {
        assert!(Stage::InitialContact.can_transition_to(Stage::InformationGathering));
        assert!(Stage::InformationGathering.can_transition_to(Stage::Screening));
        assert!(Stage::Screening.can_transition_to(Stage::Negotiation));
        assert!(Stage::Negotiation.can_transition_to(Stage::Scheduling));
        assert!(Stage::Scheduling.can_transition_to(Stage::Interviewing));
    }

    #[test]
    fn any_live_stage_can_decline() {
        assert!(Stage::InitialContact.can_transition_to(Stage::Declined));
        assert!(Stage::Screening.can_transition_to(Stage::Declined));
        assert!(Stage::Interviewing.can_transition_to(Stage::Declined));
    }

    #[test]
    fn terminal_stages_reject_everything() {
        for target in [
            Stage::InitialContact,
            Stage::InformationGathering,
            Stage::Screening,
            Stage::Negotiation,
            Stage::Scheduling,
            Stage::Interviewing,
            Stage::Declined,
            Stage::Closed,
        ] {
            assert!(!Stage::Declined.can_transition_to(target));
            assert!(!Stage::Closed.can_transition_to(target));
        }
    }

    #[test]
    fn self_transition_allowed_when_live() {
        assert!(Stage::InformationGathering.can_transition_to(Stage::InformationGathering));
        assert!(Stage::Screening.can_transition_to(Stage::Screening));
    }

    #[test]
    fn interviewing_not_reachable_from_information_gathering() {
        // Must pass through scheduling first — the session spawn hangs off
        // that edge.
        assert!(!Stage::InformationGathering.can_transition_to(Stage::Interviewing));
    }

    #[test]
    fn terminal_flags() {
        assert!(Stage::Declined.is_terminal());
        assert!(Stage::Closed.is_terminal());
        assert!(Stage::Interviewing.is_active());
    }

    #[test]
    fn display_round_trip() {
        for stage in [
            Stage::InitialContact,
            Stage::Screening,
            Stage::Interviewing,
            Stage::Closed,
        ] {
            let parsed: Stage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Stage::InformationGathering).unwrap();
        assert_eq!(json, "\"information_gathering\"");
    }
}
