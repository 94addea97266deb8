//! Read-only snapshot of user preferences and negotiation policy.
//!
//! Loaded once at startup from a JSON file; the core only ever reads it.
//! Rate floors and logistics feed reply prompts, never gate decisions —
//! anything touching money escalates regardless (see `escalation`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// User profile snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Display name used in outbound replies.
    pub name: String,
    /// Years-of-experience blurb, e.g. "10+ years".
    #[serde(default)]
    pub experience_summary: String,
    /// Minimum acceptable hourly rate (USD).
    #[serde(default)]
    pub minimum_hourly: Option<u32>,
    /// Target hourly rate (USD).
    #[serde(default)]
    pub target_hourly: Option<u32>,
    /// "remote", "hybrid", "onsite" preference.
    #[serde(default)]
    pub work_arrangement: Option<String>,
    /// US work authorization answer.
    #[serde(default)]
    pub us_authorization: Option<String>,
    /// Whether visa sponsorship is needed.
    #[serde(default)]
    pub sponsorship_needed: Option<String>,
    /// Notice period, e.g. "2 weeks".
    #[serde(default)]
    pub notice_period: Option<String>,
    /// Interview availability blurb.
    #[serde(default)]
    pub interview_availability: Option<String>,
    /// Skills highlighted in screening answers.
    #[serde(default)]
    pub key_skills: Vec<String>,
}

impl Profile {
    /// Load a profile from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::ProfileParse(e.to_string()))
    }

    /// Minimal profile used when no file is configured.
    pub fn anonymous() -> Self {
        Self {
            name: "Candidate".to_string(),
            experience_summary: String::new(),
            minimum_hourly: None,
            target_hourly: None,
            work_arrangement: None,
            us_authorization: None,
            sponsorship_needed: None,
            notice_period: None,
            interview_availability: None,
            key_skills: Vec::new(),
        }
    }

    /// Render the profile as prompt context lines.
    pub fn prompt_context(&self) -> String {
        let mut out = format!("Candidate: {}\n", self.name);
        if !self.experience_summary.is_empty() {
            out.push_str(&format!("Experience: {}\n", self.experience_summary));
        }
        if let (Some(min), Some(target)) = (self.minimum_hourly, self.target_hourly) {
            out.push_str(&format!("Rate expectations: ${min}-{target}/hr\n"));
        }
        if let Some(ref wa) = self.work_arrangement {
            out.push_str(&format!("Work arrangement: {wa}\n"));
        }
        if let Some(ref auth) = self.us_authorization {
            out.push_str(&format!("US work authorization: {auth}\n"));
        }
        if let Some(ref notice) = self.notice_period {
            out.push_str(&format!("Notice period: {notice}\n"));
        }
        if !self.key_skills.is_empty() {
            out.push_str(&format!("Key skills: {}\n", self.key_skills.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(
            &path,
            r#"{"name": "Elena", "minimum_hourly": 65, "target_hourly": 75, "key_skills": ["Java", "Selenium"]}"#,
        )
        .unwrap();

        let profile = Profile::load(&path).unwrap();
        assert_eq!(profile.name, "Elena");
        assert_eq!(profile.minimum_hourly, Some(65));
        assert_eq!(profile.key_skills.len(), 2);
    }

    #[test]
    fn rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Profile::load(&path).is_err());
    }

    #[test]
    fn prompt_context_includes_rates() {
        let mut profile = Profile::anonymous();
        profile.minimum_hourly = Some(65);
        profile.target_hourly = Some(75);
        let ctx = profile.prompt_context();
        assert!(ctx.contains("$65-75/hr"));
    }

    #[test]
    fn prompt_context_omits_missing_fields() {
        let profile = Profile::anonymous();
        let ctx = profile.prompt_context();
        assert!(!ctx.contains("Rate expectations"));
        assert!(!ctx.contains("Notice period"));
    }
}
