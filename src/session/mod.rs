//! Automated interview sessions.

pub mod controller;
pub mod model;

pub use controller::{InterviewController, SessionOutcome};
pub use model::{InterviewSession, QaEntry, SessionStatus};
