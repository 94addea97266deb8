//! Content-signal detection for inbound events.
//!
//! The core state machine depends only on the closed [`ContentSignal`]
//! enum — never on raw text — so the detector can be swapped or tested
//! independently. The default [`KeywordDetector`] is a compiled-regex
//! pass over the event content, run before any stage decision.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A closed set of intent signals a detector may report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ContentSignal {
    /// Explicit decline or opt-out (STOP, "not interested").
    Decline,
    /// A concrete offer with final terms.
    FinalOffer,
    /// Salary/rate negotiation content.
    Negotiation,
    /// An interview link was found in the content.
    InterviewLink { url: String },
    /// Scheduling language (availability, calendar, time slots).
    Scheduling,
    /// A screening question the candidate is expected to answer.
    ScreeningQuestion,
    /// A technical assessment or coding exercise marker.
    TechnicalAssessment,
}

impl ContentSignal {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Decline => "decline",
            Self::FinalOffer => "final_offer",
            Self::Negotiation => "negotiation",
            Self::InterviewLink { .. } => "interview_link",
            Self::Scheduling => "scheduling",
            Self::ScreeningQuestion => "screening_question",
            Self::TechnicalAssessment => "technical_assessment",
        }
    }
}

/// Detection output: the signals found plus an overall confidence.
///
/// Rule-matched signals carry confidence 1.0; a detector backed by a
/// model would report its own score. An empty signal list with low
/// confidence marks the event ambiguous for the escalation gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub signals: Vec<ContentSignal>,
    pub confidence: f32,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            signals: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn has(&self, label: &str) -> bool {
        self.signals.iter().any(|s| s.label() == label)
    }

    pub fn interview_url(&self) -> Option<&str> {
        self.signals.iter().find_map(|s| match s {
            ContentSignal::InterviewLink { url } => Some(url.as_str()),
            _ => None,
        })
    }
}

/// Pluggable signal detector.
pub trait SignalDetector: Send + Sync {
    /// Detect intent signals in raw content.
    fn detect(&self, content: &str) -> Detection;
}

// ── Keyword detector ────────────────────────────────────────────────

/// Default regex-based detector.
pub struct KeywordDetector {
    decline: Regex,
    final_offer: Regex,
    negotiation: Regex,
    interview_url: Vec<Regex>,
    scheduling: Regex,
    screening: Regex,
    technical: Regex,
}

impl KeywordDetector {
    pub fn new() -> Self {
        Self {
            decline: Regex::new(
                r"(?i)\b(STOP|UNSUBSCRIBE|not interested|no longer interested|withdraw (my )?(application|candidacy)|position (has been |was )?filled)\b",
            )
            .unwrap(),
            final_offer: Regex::new(
                r"(?i)\b(final offer|official offer|offer letter|we('d| would) like to extend (you )?an offer|pleased to offer)\b",
            )
            .unwrap(),
            negotiation: Regex::new(
                r"(?i)(\$\s?\d{2,3}([,.]\d{3})?\s?(-|to)\s?\$?\s?\d{2,3}|\$\d{2,3}/hr|salary range|rate (is|of|would be)|compensation|hourly rate|counter[- ]?offer)",
            )
            .unwrap(),
            interview_url: vec![
                Regex::new(r#"(?i)https://[^\s<>"]*interview[^\s<>"]*"#).unwrap(),
                Regex::new(r#"(?i)interview[^"'<>\n]*?(?:link|url)[^"'<>\n]*?[:=]\s*(https?://[^\s"'<>]+)"#)
                    .unwrap(),
                Regex::new(r#"(?i)join[^"'<>\n]*?meeting[^"'<>\n]*?[:=]\s*(https?://[^\s"'<>]+)"#)
                    .unwrap(),
            ],
            scheduling: Regex::new(
                r"(?i)\b(schedule|availability|available (times?|slots?)|calendar|book a (time|call)|what times? work|set up a (call|meeting|time))\b",
            )
            .unwrap(),
            screening: Regex::new(
                r"(?i)\b(work authorization|sponsorship|notice period|years of experience|W2 or C2C|current location|are you authorized|screening question)\b",
            )
            .unwrap(),
            technical: Regex::new(
                r"(?i)\b(coding (challenge|exercise|test)|technical assessment|take[- ]home|hackerrank|codility|code review exercise)\b",
            )
            .unwrap(),
        }
    }

    fn find_interview_url(&self, content: &str) -> Option<String> {
        for pattern in &self.interview_url {
            if let Some(caps) = pattern.captures(content) {
                // Prefer the capture group if the pattern has one.
                let url = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']))?;
                if url.starts_with("http") {
                    return Some(url.to_string());
                }
            }
        }
        None
    }
}

impl Default for KeywordDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalDetector for KeywordDetector {
    fn detect(&self, content: &str) -> Detection {
        let mut signals = Vec::new();

        if self.decline.is_match(content) {
            signals.push(ContentSignal::Decline);
        }
        if self.final_offer.is_match(content) {
            signals.push(ContentSignal::FinalOffer);
        }
        if self.negotiation.is_match(content) {
            signals.push(ContentSignal::Negotiation);
        }
        if let Some(url) = self.find_interview_url(content) {
            signals.push(ContentSignal::InterviewLink { url });
        }
        if self.scheduling.is_match(content) {
            signals.push(ContentSignal::Scheduling);
        }
        if self.screening.is_match(content) {
            signals.push(ContentSignal::ScreeningQuestion);
        }
        if self.technical.is_match(content) {
            signals.push(ContentSignal::TechnicalAssessment);
        }

        let confidence = if signals.is_empty() { 0.0 } else { 1.0 };
        Detection {
            signals,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(content: &str) -> Detection {
        KeywordDetector::new().detect(content)
    }

    #[test]
    fn detects_stop_keyword() {
        let d = detect("STOP");
        assert!(d.has("decline"));
        assert!((d.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn detects_not_interested() {
        assert!(detect("Thanks, but I'm not interested in this role.").has("decline"));
    }

    #[test]
    fn detects_final_offer() {
        let d = detect("We are pleased to offer you the position. Offer letter attached.");
        assert!(d.has("final_offer"));
    }

    #[test]
    fn detects_rate_negotiation() {
        let d = detect("The rate is $45-48/hr for this 6 month contract.");
        assert!(d.has("negotiation"));
    }

    #[test]
    fn detects_interview_url_direct() {
        let d = detect("Please complete the assessment here: https://hr.example.com/interview/abc123");
        assert_eq!(
            d.interview_url(),
            Some("https://hr.example.com/interview/abc123")
        );
    }

    #[test]
    fn detects_interview_url_labeled() {
        let d = detect("Your interview link: https://meet.example.com/xyz");
        assert!(d.interview_url().is_some());
    }

    #[test]
    fn strips_trailing_punctuation_from_url() {
        let d = detect("Interview url: https://meet.example.com/xyz.");
        assert_eq!(d.interview_url(), Some("https://meet.example.com/xyz"));
    }

    #[test]
    fn detects_scheduling() {
        assert!(detect("What times work for you next week? Let's set up a call.").has("scheduling"));
    }

    #[test]
    fn detects_screening_question() {
        assert!(detect("Do you need sponsorship? What is your notice period?").has("screening_question"));
    }

    #[test]
    fn detects_technical_assessment() {
        assert!(detect("Next step is a HackerRank coding challenge.").has("technical_assessment"));
    }

    #[test]
    fn multiple_signals_reported_together() {
        let d = detect(
            "Not interested, and please stop sending your interview link: https://x.example/i",
        );
        assert!(d.has("decline"));
        assert!(d.has("interview_link"));
    }

    #[test]
    fn plain_chatter_yields_nothing() {
        let d = detect("Hi, just checking in about your week.");
        assert!(d.signals.is_empty());
        assert!(d.confidence < f32::EPSILON);
    }
}
