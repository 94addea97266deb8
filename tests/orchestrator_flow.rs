//! End-to-end pipeline tests.
//!
//! Each test wires a full orchestrator over the in-memory store with
//! stub transports, a canned generator, and a read-only browser driver,
//! then pushes events through `handle_event` and asserts on the
//! persisted state and recorded sends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use recruit_assist::browser::{
    BrowserDriver, BrowserPool, PageAction, PageContent, PageElement, PageHandle,
};
use recruit_assist::channels::{ChannelTransport, DeliveryId};
use recruit_assist::config::{GateConfig, InterviewConfig, OrchestratorConfig};
use recruit_assist::conversation::{Channel, Conversation, Stage};
use recruit_assist::error::{GenerationError, InteractionError, StoreError, TransportError};
use recruit_assist::escalation::{EscalationGate, EscalationReason, EscalationRecord};
use recruit_assist::llm::{ConversationContext, DraftReply, ResponseGenerator};
use recruit_assist::normalizer::{InboundEvent, Normalizer, RawMessage};
use recruit_assist::orchestrator::{EventOutcome, Orchestrator};
use recruit_assist::profile::Profile;
use recruit_assist::session::{InterviewController, InterviewSession, SessionStatus};
use recruit_assist::signals::KeywordDetector;
use recruit_assist::store::{DeadLetter, MemoryStore, Store};

// ── Stubs ───────────────────────────────────────────────────────────

/// Transport that records sends instead of talking to a server, and
/// serves scripted fetch batches for daemon tests.
struct RecordingTransport {
    label: &'static str,
    sent: Mutex<Vec<(String, Option<String>, String)>>,
    inbox: Mutex<VecDeque<Vec<RawMessage>>>,
}

impl RecordingTransport {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
        })
    }

    fn sent(&self) -> Vec<(String, Option<String>, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn push_batch(&self, batch: Vec<RawMessage>) {
        self.inbox.lock().unwrap().push_back(batch);
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    fn name(&self) -> &str {
        self.label
    }

    async fn fetch_new(&self) -> Result<Vec<RawMessage>, TransportError> {
        Ok(self.inbox.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryId, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((
            recipient.to_string(),
            subject.map(String::from),
            body.to_string(),
        ));
        Ok(format!("{}-{}", self.label, sent.len()))
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct CannedGenerator {
    reply: String,
}

#[async_trait]
impl ResponseGenerator for CannedGenerator {
    async fn draft(&self, _context: &ConversationContext) -> Result<DraftReply, GenerationError> {
        Ok(DraftReply {
            content: self.reply.clone(),
            model: "canned".to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

struct FailingGenerator;

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    async fn draft(&self, _context: &ConversationContext) -> Result<DraftReply, GenerationError> {
        Err(GenerationError::RequestFailed {
            reason: "boom".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Read-only driver that serves one question page; any interaction is
/// unsupported, which forces the session into review.
struct QuestionPageDriver;

#[async_trait]
impl BrowserDriver for QuestionPageDriver {
    async fn open(&self, _url: &str, _headless: bool) -> Result<PageHandle, InteractionError> {
        Ok(PageHandle::new())
    }

    async fn content(&self, _handle: &PageHandle) -> Result<PageContent, InteractionError> {
        Ok(PageContent {
            url: "https://hr.example.com/interview/abc123".to_string(),
            title: "Interview".to_string(),
            text: "Question 1 of 5. What is a mutex and when would you use one?".to_string(),
            elements: vec![PageElement {
                tag: "h2".to_string(),
                text: "What is a mutex and when would you use one?".to_string(),
            }],
            buttons: Vec::new(),
            has_answer_field: true,
        })
    }

    async fn interact(
        &self,
        _handle: &PageHandle,
        action: &PageAction,
    ) -> Result<(), InteractionError> {
        Err(InteractionError::Unsupported {
            action: action.label().to_string(),
        })
    }

    async fn close(&self, _handle: &PageHandle) -> Result<(), InteractionError> {
        Ok(())
    }
}

/// Store that fails one designated `upsert_conversation` call and
/// delegates everything else to an in-memory store.
struct FlakyConversationStore {
    inner: MemoryStore,
    fail_on_call: usize,
    upserts: AtomicUsize,
}

impl FlakyConversationStore {
    fn failing_call(fail_on_call: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on_call,
            upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for FlakyConversationStore {
    async fn get_conversation(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        self.inner.get_conversation(thread_id).await
    }

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<i64, StoreError> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(StoreError::Query("disk full".to_string()));
        }
        self.inner.upsert_conversation(conversation).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations().await
    }

    async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<InterviewSession>, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn save_session(&self, session: &InterviewSession) -> Result<i64, StoreError> {
        self.inner.save_session(session).await
    }

    async fn active_session_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<InterviewSession>, StoreError> {
        self.inner.active_session_for_thread(thread_id).await
    }

    async fn insert_escalation(&self, record: &EscalationRecord) -> Result<(), StoreError> {
        self.inner.insert_escalation(record).await
    }

    async fn open_escalations(&self) -> Result<Vec<EscalationRecord>, StoreError> {
        self.inner.open_escalations().await
    }

    async fn resolve_escalation(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.resolve_escalation(id).await
    }

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.inner.insert_dead_letter(letter).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.inner.dead_letters().await
    }

    async fn mark_event_seen(&self, event_id: &str) -> Result<bool, StoreError> {
        self.inner.mark_event_seen(event_id).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryStore>,
    email: Arc<RecordingTransport>,
    sms: Arc<RecordingTransport>,
}

fn orchestrator_on(
    store: Arc<dyn Store>,
    generator: Arc<dyn ResponseGenerator>,
    config: OrchestratorConfig,
    email: Arc<RecordingTransport>,
    sms: Arc<RecordingTransport>,
) -> Orchestrator {
    let interview_config = InterviewConfig {
        retry_attempts: 1,
        lease_timeout: Duration::from_millis(100),
        backoff_base: Duration::from_millis(1),
        ..Default::default()
    };
    let controller = Arc::new(InterviewController::new(
        Arc::new(QuestionPageDriver),
        Arc::clone(&generator),
        Arc::new(KeywordDetector::new()),
        EscalationGate::new(GateConfig::default()),
        BrowserPool::new(1),
        interview_config,
    ));

    Orchestrator::new(
        store,
        Arc::new(KeywordDetector::new()),
        EscalationGate::new(GateConfig::default()),
        generator,
        email as Arc<dyn ChannelTransport>,
        sms as Arc<dyn ChannelTransport>,
        controller,
        Normalizer::new(vec!["txt.att.net".to_string()]),
        Profile::anonymous(),
        config,
        true,
    )
}

fn harness_with(generator: Arc<dyn ResponseGenerator>, auto_reply: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let email = RecordingTransport::new("email");
    let sms = RecordingTransport::new("sms");

    let config = OrchestratorConfig {
        event_retry_attempts: 2,
        auto_reply_enabled: auto_reply,
        ..Default::default()
    };
    let orchestrator = orchestrator_on(
        Arc::clone(&store) as Arc<dyn Store>,
        generator,
        config,
        Arc::clone(&email),
        Arc::clone(&sms),
    );

    Harness {
        orchestrator,
        store,
        email,
        sms,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(CannedGenerator {
            reply: "Thanks, here are the details you asked for.".to_string(),
        }),
        true,
    )
}

fn email_event(thread_id: &str, subject: Option<&str>, content: &str) -> InboundEvent {
    InboundEvent {
        event_id: format!("evt-{}", Uuid::new_v4()),
        thread_id: thread_id.to_string(),
        channel: Channel::Email,
        sender: Some("alex@agency.com".to_string()),
        subject: subject.map(String::from),
        content: content.to_string(),
        received_at: Utc::now(),
        session_id: None,
    }
}

fn raw_email(external_id: &str, content: &str) -> RawMessage {
    RawMessage {
        external_id: external_id.to_string(),
        sender: "alex@agency.com".to_string(),
        sender_name: None,
        subject: Some("QA Architect role".to_string()),
        content: content.to_string(),
        received_at: Utc::now(),
        thread_hint: Some("QA Architect role".to_string()),
    }
}

fn sms_event(thread_id: &str, content: &str) -> InboundEvent {
    InboundEvent {
        event_id: format!("evt-{}", Uuid::new_v4()),
        thread_id: thread_id.to_string(),
        channel: Channel::Sms,
        sender: None,
        subject: None,
        content: content.to_string(),
        received_at: Utc::now(),
        session_id: None,
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn screening_question_gets_auto_reply() {
    let h = harness();
    let event = email_event(
        "email_qa_role",
        Some("QA Architect role"),
        "Are you authorized to work in the US? What is your notice period?",
    );

    let outcome = h.orchestrator.handle_event(event).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Replied { .. }));

    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "alex@agency.com");
    assert_eq!(sent[0].1.as_deref(), Some("Re: QA Architect role"));

    let conv = h
        .store
        .get_conversation("email_qa_role")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.stage, Stage::Screening);
    // Inbound turn plus the outbound reply.
    assert_eq!(conv.history.len(), 2);
    assert!(!conv.escalated);
}

#[tokio::test]
async fn decline_closes_conversation_silently() {
    let h = harness();
    let outcome = h
        .orchestrator
        .handle_event(email_event(
            "email_t1",
            None,
            "Thanks, but I'm not interested in this role.",
        ))
        .await
        .unwrap();

    assert_eq!(outcome, EventOutcome::Declined);
    assert!(h.email.sent().is_empty());
    assert!(h.store.open_escalations().await.unwrap().is_empty());

    let conv = h.store.get_conversation("email_t1").await.unwrap().unwrap();
    assert_eq!(conv.stage, Stage::Declined);
}

#[tokio::test]
async fn terminal_conversation_ignores_later_events() {
    let h = harness();
    h.orchestrator
        .handle_event(email_event("email_t1", None, "Not interested, thanks."))
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .handle_event(email_event("email_t1", None, "Just checking in again!"))
        .await
        .unwrap();
    assert_eq!(outcome, EventOutcome::TerminalIgnored);

    let conv = h.store.get_conversation("email_t1").await.unwrap().unwrap();
    assert_eq!(conv.history.len(), 1);
}

#[tokio::test]
async fn offer_escalates_with_suppressed_draft() {
    let h = harness();
    h.orchestrator
        .handle_event(email_event(
            "email_t2",
            None,
            "Are you authorized to work in the US?",
        ))
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .handle_event(email_event(
            "email_t2",
            None,
            "We are pleased to offer you the position at $70/hr. Offer letter attached.",
        ))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EventOutcome::Held {
            reason: EscalationReason::Offer,
            session_id: None,
        }
    );
    // Only the screening reply went out; the offer was held.
    assert_eq!(h.email.sent().len(), 1);

    let escalations = h.store.open_escalations().await.unwrap();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].reason, EscalationReason::Offer);
    assert!(escalations[0].suppressed_draft().is_some());

    let conv = h.store.get_conversation("email_t2").await.unwrap().unwrap();
    assert!(conv.escalated);
    assert_eq!(conv.stage, Stage::Negotiation);
}

#[tokio::test]
async fn interview_link_spawns_session_and_holds_for_review() {
    let h = harness();
    let outcome = h
        .orchestrator
        .handle_event(email_event(
            "email_t3",
            None,
            "Next step: please complete https://hr.example.com/interview/abc123 this week.",
        ))
        .await
        .unwrap();

    let session_id = match outcome {
        EventOutcome::Held {
            reason: EscalationReason::Scheduling,
            session_id: Some(id),
        } => id,
        other => panic!("expected scheduling hold with session, got {other:?}"),
    };

    let session = h.store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.thread_id, "email_t3");
    assert_eq!(session.status, SessionStatus::AwaitingAnswer);
    // The answer was drafted and logged before the read-only driver
    // refused to submit it.
    assert_eq!(session.qa_log.len(), 1);
    assert!(!session.qa_log[0].submitted);

    let conv = h.store.get_conversation("email_t3").await.unwrap().unwrap();
    assert_eq!(conv.stage, Stage::Interviewing);

    // One escalation for the scheduling hold, one for the interview review.
    let escalations = h.store.open_escalations().await.unwrap();
    assert_eq!(escalations.len(), 2);
    assert!(
        escalations
            .iter()
            .any(|e| e.payload.get("kind").and_then(|v| v.as_str()) == Some("interview_review"))
    );
}

#[tokio::test]
async fn interview_link_replay_reuses_live_session() {
    let h = harness();
    let content = "Please complete https://hr.example.com/interview/abc123 today.";
    let first = h
        .orchestrator
        .handle_event(email_event("email_t4", None, content))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .handle_event(email_event("email_t4", None, content))
        .await
        .unwrap();

    let (a, b) = match (first, second) {
        (
            EventOutcome::Held {
                session_id: Some(a),
                ..
            },
            EventOutcome::Held {
                session_id: Some(b),
                ..
            },
        ) => (a, b),
        other => panic!("expected two holds with sessions, got {other:?}"),
    };
    assert_eq!(a, b);
}

#[tokio::test]
async fn duplicate_event_is_skipped() {
    let h = harness();
    let event = email_event("email_t5", None, "What is your notice period?");

    let first = h.orchestrator.handle_event(event.clone()).await.unwrap();
    let second = h.orchestrator.handle_event(event).await.unwrap();

    assert!(matches!(first, EventOutcome::Replied { .. }));
    assert_eq!(second, EventOutcome::Duplicate);
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn disabled_auto_reply_parks_draft() {
    let h = harness_with(
        Arc::new(CannedGenerator {
            reply: "Drafted answer.".to_string(),
        }),
        false,
    );

    let outcome = h
        .orchestrator
        .handle_event(email_event("email_t6", None, "What is your notice period?"))
        .await
        .unwrap();

    assert_eq!(outcome, EventOutcome::Suppressed);
    assert!(h.email.sent().is_empty());

    let escalations = h.store.open_escalations().await.unwrap();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].suppressed_draft(), Some("Drafted answer."));
}

#[tokio::test]
async fn generator_outage_dead_letters_event() {
    let h = harness_with(Arc::new(FailingGenerator), true);

    let outcome = h
        .orchestrator
        .handle_event(email_event("email_t7", None, "What is your notice period?"))
        .await
        .unwrap();

    assert_eq!(outcome, EventOutcome::DeadLettered);
    assert_eq!(h.store.dead_letters().await.unwrap().len(), 1);

    let escalations = h.store.open_escalations().await.unwrap();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].reason, EscalationReason::Ambiguous);
}

#[tokio::test]
async fn sms_reply_routes_through_gateway_transport() {
    let h = harness();
    let outcome = h
        .orchestrator
        .handle_event(sms_event("sms_4045551234", "What is your notice period?"))
        .await
        .unwrap();

    assert!(matches!(outcome, EventOutcome::Replied { .. }));
    assert!(h.email.sent().is_empty());

    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "sms_4045551234");
}

#[tokio::test]
async fn sms_stop_declines_without_reply() {
    let h = harness();
    let outcome = h
        .orchestrator
        .handle_event(sms_event("sms_4045551234", "STOP"))
        .await
        .unwrap();

    assert_eq!(outcome, EventOutcome::Declined);
    assert!(h.sms.sent().is_empty());

    let conv = h
        .store
        .get_conversation("sms_4045551234")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.stage, Stage::Declined);
    assert_eq!(conv.channel, Channel::Sms);
}

#[tokio::test]
async fn counterpart_details_accumulate_across_events() {
    let h = harness();
    h.orchestrator
        .handle_event(email_event(
            "email_t8",
            Some("Role: QA Architect"),
            "Company: Acme Robotics\nThis is a fully remote position.",
        ))
        .await
        .unwrap();
    h.orchestrator
        .handle_event(email_event(
            "email_t8",
            None,
            "The rate is $65-75/hr on W2. What is your availability?",
        ))
        .await
        .unwrap();

    let conv = h.store.get_conversation("email_t8").await.unwrap().unwrap();
    assert_eq!(conv.counterpart.company.as_deref(), Some("Acme Robotics"));
    assert_eq!(conv.counterpart.position.as_deref(), Some("QA Architect"));
    assert_eq!(conv.counterpart.salary_range.as_deref(), Some("$65-75/hr"));
    assert_eq!(conv.counterpart.work_arrangement.as_deref(), Some("fully remote"));
}

#[tokio::test]
async fn store_failure_after_delivery_does_not_resend() {
    // The first upsert persists the inbound turn; the second runs after
    // the reply has gone out. Failing it must not re-run the pipeline.
    let store = Arc::new(FlakyConversationStore::failing_call(2));
    let email = RecordingTransport::new("email");
    let sms = RecordingTransport::new("sms");
    let config = OrchestratorConfig {
        event_retry_attempts: 3,
        ..Default::default()
    };
    let orchestrator = orchestrator_on(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(CannedGenerator {
            reply: "Two weeks.".to_string(),
        }),
        config,
        Arc::clone(&email),
        Arc::clone(&sms),
    );

    let outcome = orchestrator
        .handle_event(email_event("email_t9", None, "What is your notice period?"))
        .await
        .unwrap();

    assert!(matches!(outcome, EventOutcome::Replied { .. }));
    assert_eq!(email.sent().len(), 1);

    // The lost write is parked for replay.
    let letters = store.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].error, "outbound turn lost after delivery");
    assert_eq!(
        letters[0].event.get("outbound_body").and_then(|v| v.as_str()),
        Some("Two weeks.")
    );
}

#[tokio::test]
async fn daemon_rebuilds_idle_lanes_between_polls() {
    let store = Arc::new(MemoryStore::new());
    let email = RecordingTransport::new("email");
    let sms = RecordingTransport::new("sms");
    email.push_batch(vec![raw_email("m1", "What is your notice period?")]);

    let config = OrchestratorConfig {
        event_retry_attempts: 1,
        poll_interval: Duration::from_millis(10),
        lane_idle_timeout: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(1),
        ..Default::default()
    };
    let orchestrator = Arc::new(orchestrator_on(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(CannedGenerator {
            reply: "Two weeks.".to_string(),
        }),
        config,
        Arc::clone(&email),
        Arc::clone(&sms),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon = tokio::spawn(Arc::clone(&orchestrator).run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    // The first lane has idled out by now; the follow-up for the same
    // thread must land on a rebuilt lane.
    email.push_batch(vec![raw_email("m2", "And your current location?")]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(true).unwrap();
    daemon.await.unwrap().unwrap();

    assert_eq!(email.sent().len(), 2);
    let conv = store
        .get_conversation("email_qa_architect_role")
        .await
        .unwrap()
        .unwrap();
    // Two inbound turns, two replies.
    assert_eq!(conv.history.len(), 4);
}
