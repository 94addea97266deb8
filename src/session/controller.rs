//! Interview session controller.
//!
//! Drives one [`InterviewSession`] through the browser: open the page,
//! extract questions, draft answers, submit, repeat. Every answer is
//! logged before submission is attempted. If the driver cannot perform
//! an interaction the session halts in `awaiting_answer` and the drafted
//! answer is handed back for human review instead of being lost.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::{
    BrowserDriver, BrowserPool, PageAction, PageHandle, PagePlan, extract_code, extract_question,
    plan_next,
};
use crate::config::InterviewConfig;
use crate::conversation::{Channel, Stage, model::Counterpart};
use crate::error::{InteractionError, Result};
use crate::escalation::{EscalationGate, GateDecision};
use crate::llm::{ConversationContext, ResponseGenerator};
use crate::profile::Profile;
use crate::session::model::{InterviewSession, SessionStatus};
use crate::signals::SignalDetector;

/// Cap on extract/answer cycles per run.
const MAX_STEPS: usize = 12;

/// How a controller run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All questions found on the page were answered and submitted.
    Completed { questions_answered: usize },
    /// A human must take over. The drafted answer, if any, is preserved
    /// in the session's Q/A log and returned here.
    NeedsReview {
        question: String,
        draft_answer: Option<String>,
    },
}

pub struct InterviewController {
    driver: Arc<dyn BrowserDriver>,
    generator: Arc<dyn ResponseGenerator>,
    detector: Arc<dyn SignalDetector>,
    gate: EscalationGate,
    pool: BrowserPool,
    config: InterviewConfig,
}

impl InterviewController {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        generator: Arc<dyn ResponseGenerator>,
        detector: Arc<dyn SignalDetector>,
        gate: EscalationGate,
        pool: BrowserPool,
        config: InterviewConfig,
    ) -> Self {
        Self {
            driver,
            generator,
            detector,
            gate,
            pool,
            config,
        }
    }

    /// Run the session to completion, review halt, or failure.
    ///
    /// The browser lease is held for the whole run and released when
    /// this function returns, on every path.
    pub async fn run(
        &self,
        session: &mut InterviewSession,
        profile: &Profile,
    ) -> Result<SessionOutcome> {
        let _lease = self.pool.acquire(self.config.lease_timeout).await?;

        session.advance(SessionStatus::Opening);
        let url = session.url.clone();
        let headless = session.headless;
        let handle = match self
            .with_retries("open", || self.driver.open(&url, headless))
            .await
        {
            Ok(h) => h,
            Err(err) => {
                session.fail(err.to_string());
                session.advance(SessionStatus::Closed);
                return Err(err.into());
            }
        };

        session.advance(SessionStatus::Navigating);
        let result = self.drive(session, profile, &handle).await;

        // Best effort; the handle may already be gone.
        if let Err(err) = self.driver.close(&handle).await {
            warn!(session_id = %session.session_id, error = %err, "Failed to close page");
        }

        // Unrecoverable runs end closed, with the failure reason kept.
        if result.is_err() {
            session.advance(SessionStatus::Closed);
        }

        result
    }

    async fn drive(
        &self,
        session: &mut InterviewSession,
        profile: &Profile,
        handle: &PageHandle,
    ) -> Result<SessionOutcome> {
        let mut answered = 0usize;

        for _ in 0..MAX_STEPS {
            session.advance(SessionStatus::Extracting);
            let content = match self
                .with_retries("content", || self.page_content(handle))
                .await
            {
                Ok(c) => c,
                Err(err) => {
                    session.fail(err.to_string());
                    return Err(err.into());
                }
            };

            match plan_next(&content) {
                PagePlan::AnalyzeCode | PagePlan::AnswerQuestion => {
                    let code = extract_code(&content);
                    let question = extract_question(&content)
                        .or_else(|| code.as_ref().map(|_| "Review the code shown.".to_string()))
                        .unwrap_or_else(|| content.text.clone());

                    session.advance(SessionStatus::AwaitingAnswer);
                    let incoming = match &code {
                        Some(snippet) => format!("{question}\n\n```\n{snippet}\n```"),
                        None => question.clone(),
                    };
                    let detection = self.detector.detect(&incoming);
                    let context = self.interview_context(session, profile, incoming);
                    let draft = match self.generator.draft(&context).await {
                        Ok(d) => d,
                        Err(err) => {
                            session.fail(err.to_string());
                            return Err(err.into());
                        }
                    };

                    // Logged before any submit attempt.
                    session.log_answer(&question, code, &draft.content);

                    // Binding questions (offers, rates, scheduling
                    // commitments) are never auto-submitted.
                    if let GateDecision::Escalate(reason) =
                        self.gate.decide(Stage::Interviewing, &detection)
                    {
                        info!(
                            session_id = %session.session_id,
                            reason = %reason,
                            "Question needs human review; holding draft"
                        );
                        return Ok(SessionOutcome::NeedsReview {
                            question,
                            draft_answer: Some(draft.content),
                        });
                    }

                    let submitted = self
                        .with_retries("submit", || self.submit_answer(handle, &draft.content))
                        .await;
                    match submitted {
                        Ok(()) => {
                            session.mark_last_submitted();
                            session.advance(SessionStatus::Answered);
                            answered += 1;
                            info!(
                                session_id = %session.session_id,
                                answered,
                                "Interview answer submitted"
                            );
                        }
                        Err(InteractionError::Unsupported { .. }) => {
                            // Read-only driver. Halt for review with the
                            // draft intact; the session stays open.
                            info!(
                                session_id = %session.session_id,
                                "Driver cannot submit; holding answer for review"
                            );
                            return Ok(SessionOutcome::NeedsReview {
                                question,
                                draft_answer: Some(draft.content),
                            });
                        }
                        Err(err) => {
                            session.fail(err.to_string());
                            return Err(err.into());
                        }
                    }
                }
                PagePlan::Click(label) => {
                    match self
                        .driver
                        .interact(handle, &PageAction::Click { target: label.clone() })
                        .await
                    {
                        Ok(()) => {}
                        Err(InteractionError::Unsupported { .. }) => {
                            return Ok(SessionOutcome::NeedsReview {
                                question: format!(
                                    "Page requires clicking '{label}' to proceed: {}",
                                    content.title
                                ),
                                draft_answer: None,
                            });
                        }
                        Err(err) => {
                            session.fail(err.to_string());
                            return Err(err.into());
                        }
                    }
                }
                PagePlan::Inspect => break,
            }
        }

        session.advance(SessionStatus::Closed);
        Ok(SessionOutcome::Completed {
            questions_answered: answered,
        })
    }

    async fn submit_answer(
        &self,
        handle: &PageHandle,
        answer: &str,
    ) -> std::result::Result<(), InteractionError> {
        self.driver
            .interact(
                handle,
                &PageAction::FillAnswer {
                    value: answer.to_string(),
                },
            )
            .await?;
        self.driver.interact(handle, &PageAction::Submit).await
    }

    fn interview_context(
        &self,
        session: &InterviewSession,
        profile: &Profile,
        incoming: String,
    ) -> ConversationContext {
        ConversationContext {
            thread_id: session.thread_id.clone(),
            channel: Channel::Interview,
            stage: Stage::Interviewing,
            profile: profile.clone(),
            counterpart: Counterpart {
                company: session.company.clone(),
                position: session.position.clone(),
                ..Default::default()
            },
            recent_turns: Vec::new(),
            incoming,
        }
    }

    /// Page-content fetch with the configured navigation timeout on top
    /// of whatever the driver does internally.
    async fn page_content(
        &self,
        handle: &PageHandle,
    ) -> std::result::Result<crate::browser::PageContent, InteractionError> {
        tokio::time::timeout(self.config.navigation_timeout, self.driver.content(handle))
            .await
            .map_err(|_| InteractionError::LoadTimeout {
                timeout: self.config.navigation_timeout,
            })?
    }

    async fn with_retries<T, F, Fut>(
        &self,
        what: &str,
        mut op: F,
    ) -> std::result::Result<T, InteractionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, InteractionError>>,
    {
        let attempts = self.config.retry_attempts.max(1);
        let mut last: Option<InteractionError> = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(
                    err @ (InteractionError::Unsupported { .. } | InteractionError::StaleHandle),
                ) => return Err(err),
                Err(err) => {
                    if attempt < attempts {
                        let delay = self
                            .config
                            .backoff_base
                            .saturating_mul(2u32.saturating_pow(attempt - 1));
                        warn!(
                            op = what,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Browser step failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(err);
                }
            }
        }

        Err(last.unwrap_or(InteractionError::LoadTimeout {
            timeout: Duration::ZERO,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::browser::{PageContent, PageElement};
    use crate::error::{Error, GenerationError};
    use crate::llm::DraftReply;
    use crate::signals::KeywordDetector;

    fn question_page(q: &str) -> PageContent {
        PageContent {
            url: "https://x.example/i".into(),
            elements: vec![PageElement {
                tag: "h2".into(),
                text: q.into(),
            }],
            text: q.into(),
            has_answer_field: true,
            ..Default::default()
        }
    }

    fn done_page() -> PageContent {
        PageContent {
            url: "https://x.example/i".into(),
            text: "Thank you for completing the assessment".into(),
            ..Default::default()
        }
    }

    /// Serves a fixed page sequence; one page per content() call.
    struct ScriptedDriver {
        pages: Vec<PageContent>,
        cursor: AtomicUsize,
        supports_interaction: bool,
        open_failures: AtomicUsize,
        interactions: Arc<AtomicUsize>,
    }

    impl ScriptedDriver {
        fn new(pages: Vec<PageContent>, supports_interaction: bool) -> Self {
            Self {
                pages,
                cursor: AtomicUsize::new(0),
                supports_interaction,
                open_failures: AtomicUsize::new(0),
                interactions: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing_open(mut self, failures: usize) -> Self {
            self.open_failures = AtomicUsize::new(failures);
            self
        }
    }

    #[async_trait]
    impl BrowserDriver for ScriptedDriver {
        async fn open(&self, url: &str, _headless: bool) -> std::result::Result<PageHandle, InteractionError> {
            let remaining = self.open_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.open_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(InteractionError::OpenFailed {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(PageHandle::new())
        }

        async fn content(&self, _handle: &PageHandle) -> std::result::Result<PageContent, InteractionError> {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages[idx.min(self.pages.len() - 1)].clone())
        }

        async fn interact(
            &self,
            _handle: &PageHandle,
            action: &PageAction,
        ) -> std::result::Result<(), InteractionError> {
            self.interactions.fetch_add(1, Ordering::SeqCst);
            if self.supports_interaction {
                Ok(())
            } else {
                Err(InteractionError::Unsupported {
                    action: action.label().to_string(),
                })
            }
        }

        async fn close(&self, _handle: &PageHandle) -> std::result::Result<(), InteractionError> {
            Ok(())
        }
    }

    struct CannedGenerator {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResponseGenerator for CannedGenerator {
        async fn draft(
            &self,
            context: &ConversationContext,
        ) -> std::result::Result<DraftReply, GenerationError> {
            self.prompts.lock().unwrap().push(context.incoming.clone());
            Ok(DraftReply {
                content: self.reply.clone(),
                model: "canned".into(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn controller(driver: ScriptedDriver, generator: CannedGenerator) -> InterviewController {
        let config = InterviewConfig {
            backoff_base: Duration::from_millis(1),
            lease_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        InterviewController::new(
            Arc::new(driver),
            Arc::new(generator),
            Arc::new(KeywordDetector::new()),
            EscalationGate::default(),
            BrowserPool::new(1),
            config,
        )
    }

    #[tokio::test]
    async fn answers_questions_until_done() {
        let driver = ScriptedDriver::new(
            vec![
                question_page("What is your approach to flaky tests?"),
                question_page("Explain the Page Object Model?"),
                done_page(),
            ],
            true,
        );
        let ctl = controller(driver, CannedGenerator::new("A thoughtful answer."));
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        let outcome = ctl.run(&mut session, &Profile::anonymous()).await.unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::Completed {
                questions_answered: 2
            }
        );
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.qa_log.len(), 2);
        assert!(session.qa_log.iter().all(|e| e.submitted));
    }

    #[tokio::test]
    async fn read_only_driver_halts_for_review() {
        let driver = ScriptedDriver::new(
            vec![question_page("What is your notice period?")],
            false,
        );
        let ctl = controller(driver, CannedGenerator::new("Two weeks."));
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        let outcome = ctl.run(&mut session, &Profile::anonymous()).await.unwrap();
        match outcome {
            SessionOutcome::NeedsReview {
                question,
                draft_answer,
            } => {
                assert!(question.contains("notice period"));
                assert_eq!(draft_answer.as_deref(), Some("Two weeks."));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Halted, not failed — the draft stays in the log, unsubmitted.
        assert_eq!(session.status, SessionStatus::AwaitingAnswer);
        assert_eq!(session.qa_log.len(), 1);
        assert!(!session.qa_log[0].submitted);
    }

    #[tokio::test]
    async fn open_retries_then_succeeds() {
        let driver =
            ScriptedDriver::new(vec![done_page()], true).failing_open(2);
        let ctl = controller(driver, CannedGenerator::new("x"));
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        let outcome = ctl.run(&mut session, &Profile::anonymous()).await.unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::Completed {
                questions_answered: 0
            }
        );
    }

    #[tokio::test]
    async fn open_exhaustion_closes_session_with_error() {
        let driver =
            ScriptedDriver::new(vec![done_page()], true).failing_open(10);
        let ctl = controller(driver, CannedGenerator::new("x"));
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        let err = ctl.run(&mut session, &Profile::anonymous()).await.unwrap_err();
        assert!(matches!(err, Error::Interaction(_)));
        // The run ends closed, with the failure reason recorded.
        assert_eq!(session.status, SessionStatus::Closed);
        assert!(session.error.is_some());
    }

    #[tokio::test]
    async fn binding_question_is_never_auto_submitted() {
        let driver = ScriptedDriver::new(
            vec![question_page("Do you accept our final offer of $70/hr?")],
            true,
        );
        let interactions = Arc::clone(&driver.interactions);
        let ctl = controller(driver, CannedGenerator::new("I accept."));
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        let outcome = ctl.run(&mut session, &Profile::anonymous()).await.unwrap();
        match outcome {
            SessionOutcome::NeedsReview {
                question,
                draft_answer,
            } => {
                assert!(question.contains("final offer"));
                assert_eq!(draft_answer.as_deref(), Some("I accept."));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The driver could have submitted, but the draft was held.
        assert_eq!(interactions.load(Ordering::SeqCst), 0);
        assert_eq!(session.status, SessionStatus::AwaitingAnswer);
        assert_eq!(session.qa_log.len(), 1);
        assert!(!session.qa_log[0].submitted);
    }

    #[tokio::test]
    async fn code_page_gets_code_in_prompt() {
        let code_page = PageContent {
            url: "https://x.example/i".into(),
            text: "Review this:\n```python\ndef add(a, b):\n    return a + b\n```".into(),
            has_answer_field: true,
            ..Default::default()
        };
        let driver = ScriptedDriver::new(vec![code_page, done_page()], true);
        let generator = CannedGenerator::new("Looks fine.");
        let ctl = controller(driver, generator);
        let mut session = InterviewSession::new("t", "https://x.example/i", true);

        ctl.run(&mut session, &Profile::anonymous()).await.unwrap();
        assert_eq!(session.qa_log.len(), 1);
        assert!(session.qa_log[0].code_snippet.as_deref().unwrap().contains("def add"));
    }
}
