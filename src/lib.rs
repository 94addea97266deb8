//! Recruit Assist — recruiter-conversation orchestration core.

pub mod browser;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod escalation;
pub mod llm;
pub mod normalizer;
pub mod orchestrator;
pub mod profile;
pub mod session;
pub mod signals;
pub mod store;
