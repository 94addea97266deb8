//! Conversation orchestrator — the pipeline that turns inbound events
//! into state transitions, replies, escalations, and interview sessions.
//!
//! Events for the same thread are processed in arrival order on a
//! per-thread lane; distinct threads run concurrently up to
//! `max_concurrency`. Every event passes Normalize → Detect → Classify
//! → Gate before anything is sent, and the store is the only state that
//! survives a restart.

pub mod extract;

pub use extract::extract_counterpart;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::ChannelTransport;
use crate::config::OrchestratorConfig;
use crate::conversation::{Channel, Conversation, Stage, StageClassifier, Turn};
use crate::error::{Error, Result, StoreError};
use crate::escalation::{EscalationGate, EscalationReason, EscalationRecord, GateDecision};
use crate::llm::{ConversationContext, ResponseGenerator};
use crate::normalizer::{InboundEvent, Normalizer};
use crate::profile::Profile;
use crate::session::{InterviewController, InterviewSession, SessionOutcome};
use crate::signals::{Detection, SignalDetector};
use crate::store::{DeadLetter, Store};

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Already processed (replayed event ID).
    Duplicate,
    /// Conversation is terminal; event ignored.
    TerminalIgnored,
    /// Counterpart declined; conversation closed, nothing sent.
    Declined,
    /// An auto-reply went out.
    Replied { delivery_id: String },
    /// Held for human review.
    Held {
        reason: EscalationReason,
        session_id: Option<Uuid>,
    },
    /// Drafted but not sent (auto-reply disabled or no outbound path).
    Suppressed,
    /// All retries failed; parked as a dead letter.
    DeadLettered,
}

/// Point-in-time view of the system for the status command.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub conversations: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub by_channel: BTreeMap<String, usize>,
    pub open_escalations: usize,
    pub dead_letters: usize,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    detector: Arc<dyn SignalDetector>,
    classifier: StageClassifier,
    gate: EscalationGate,
    generator: Arc<dyn ResponseGenerator>,
    email: Arc<dyn ChannelTransport>,
    sms: Arc<dyn ChannelTransport>,
    controller: Arc<InterviewController>,
    normalizer: Normalizer,
    profile: Profile,
    config: OrchestratorConfig,
    /// Headless flag stamped onto new interview sessions.
    headless: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        detector: Arc<dyn SignalDetector>,
        gate: EscalationGate,
        generator: Arc<dyn ResponseGenerator>,
        email: Arc<dyn ChannelTransport>,
        sms: Arc<dyn ChannelTransport>,
        controller: Arc<InterviewController>,
        normalizer: Normalizer,
        profile: Profile,
        config: OrchestratorConfig,
        headless: bool,
    ) -> Self {
        Self {
            store,
            detector,
            classifier: StageClassifier::new(),
            gate,
            generator,
            email,
            sms,
            controller,
            normalizer,
            profile,
            config,
            headless,
        }
    }

    // ── Event pipeline ──────────────────────────────────────────────

    /// Process one event end to end, with retries and dead-lettering.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome> {
        if !self.store.mark_event_seen(&event.event_id).await? {
            debug!(event_id = %event.event_id, "Skipping replayed event");
            return Ok(EventOutcome::Duplicate);
        }

        let attempts = self.config.event_retry_attempts.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=attempts {
            match self.process(&event).await {
                Ok(outcome) => return Ok(outcome),
                Err(Error::Classification(e)) => {
                    // Terminal-stage races land here; nothing to retry.
                    warn!(thread_id = %event.thread_id, error = %e, "Event not classifiable");
                    return Ok(EventOutcome::TerminalIgnored);
                }
                Err(err) => {
                    warn!(
                        thread_id = %event.thread_id,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "Event processing failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.dead_letter(&event, &reason).await?;
        Ok(EventOutcome::DeadLettered)
    }

    /// One processing attempt.
    async fn process(&self, event: &InboundEvent) -> Result<EventOutcome> {
        let detection = self.detector.detect(&event.content);

        // The persist step may race a concurrent writer; re-read and
        // redo the whole attempt once on version conflict.
        let mut conversation = None;
        for attempt in 0..2 {
            let mut conv = match self.store.get_conversation(&event.thread_id).await? {
                Some(existing) => existing,
                None => Conversation::new(&event.thread_id, event.channel),
            };

            if conv.stage.is_terminal() {
                info!(thread_id = %event.thread_id, stage = %conv.stage, "Ignoring event for closed conversation");
                return Ok(EventOutcome::TerminalIgnored);
            }

            let outcome = self
                .classifier
                .classify(&event.thread_id, conv.stage, &detection)?;

            conv.counterpart.merge(&extract_counterpart(event));
            conv.push_turn(Turn::inbound(event.channel, &event.content, conv.stage));
            if outcome.next_stage != conv.stage {
                info!(
                    thread_id = %event.thread_id,
                    from = %conv.stage,
                    to = %outcome.next_stage,
                    "Stage transition"
                );
                conv.set_stage(outcome.next_stage);
            }

            match self.store.upsert_conversation(&conv).await {
                Ok(version) => {
                    conv.version = version;
                    conversation = Some((conv, outcome));
                    break;
                }
                Err(StoreError::Conflict { .. }) if attempt == 0 => {
                    debug!(thread_id = %event.thread_id, "Lost write race, retrying with fresh read");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let (mut conversation, outcome) = conversation.ok_or_else(|| {
            Error::Store(StoreError::Conflict {
                entity: "conversation".to_string(),
                id: event.thread_id.clone(),
                expected: -1,
            })
        })?;

        if conversation.stage == Stage::Declined {
            info!(thread_id = %event.thread_id, "Counterpart declined; closing out");
            return Ok(EventOutcome::Declined);
        }

        match self.gate.decide(conversation.stage, &detection) {
            GateDecision::Escalate(reason) => {
                self.escalate(&mut conversation, event, &detection, reason, outcome.interview_url)
                    .await
            }
            GateDecision::Proceed => self.reply(&mut conversation, event).await,
        }
    }

    /// Record an escalation, attach a suppressed draft when one can be
    /// produced, and spawn an interview session when a link arrived.
    async fn escalate(
        &self,
        conversation: &mut Conversation,
        event: &InboundEvent,
        detection: &Detection,
        reason: EscalationReason,
        interview_url: Option<String>,
    ) -> Result<EventOutcome> {
        let mut record = EscalationRecord::new(&conversation.thread_id, reason, &event.content)
            .with_signals(detection);

        // A generator outage must never block an escalation.
        match self.draft_for(conversation, event).await {
            Ok(draft) => record = record.with_suppressed_draft(&draft),
            Err(err) => warn!(
                thread_id = %conversation.thread_id,
                error = %err,
                "Could not attach draft to escalation"
            ),
        }

        self.store.insert_escalation(&record).await?;
        info!(
            thread_id = %conversation.thread_id,
            reason = %reason,
            escalation_id = %record.id,
            "Escalated for review"
        );

        let session_id = match interview_url {
            Some(url) => self.start_session(conversation, &url).await?,
            None => None,
        };

        if !conversation.escalated {
            conversation.escalated = true;
        }
        conversation.version = self.store.upsert_conversation(conversation).await?;

        Ok(EventOutcome::Held { reason, session_id })
    }

    /// Draft and send an auto-reply.
    async fn reply(
        &self,
        conversation: &mut Conversation,
        event: &InboundEvent,
    ) -> Result<EventOutcome> {
        let draft = self.draft_for(conversation, event).await?;

        let sent = if self.config.auto_reply_enabled {
            match self.outbound_route(conversation, event) {
                Some((transport, recipient)) => {
                    let subject = event.subject.as_deref().map(reply_subject);
                    let delivery_id = transport
                        .send(&recipient, subject.as_deref(), &draft)
                        .await?;
                    Some(delivery_id)
                }
                None => None,
            }
        } else {
            None
        };

        match sent {
            Some(delivery_id) => {
                conversation.push_turn(Turn::outbound(event.channel, &draft, conversation.stage));
                // The reply is already out; bubbling a store error up
                // would retry the whole event and send it again. Park
                // the lost write for replay instead.
                match self.store.upsert_conversation(conversation).await {
                    Ok(version) => conversation.version = version,
                    Err(err) => {
                        error!(
                            thread_id = %conversation.thread_id,
                            delivery_id,
                            error = %err,
                            "Reply delivered but outbound turn not persisted"
                        );
                        let payload = serde_json::json!({
                            "delivery_id": delivery_id,
                            "outbound_body": draft,
                            "store_error": err.to_string(),
                        });
                        let letter = DeadLetter::new(
                            &conversation.thread_id,
                            payload,
                            "outbound turn lost after delivery",
                        );
                        if let Err(err) = self.store.insert_dead_letter(&letter).await {
                            error!(
                                thread_id = %conversation.thread_id,
                                error = %err,
                                "Dead-letter write failed"
                            );
                        }
                    }
                }
                info!(thread_id = %conversation.thread_id, delivery_id, "Auto-reply sent");
                Ok(EventOutcome::Replied { delivery_id })
            }
            None => {
                // Keep the draft reviewable instead of dropping it.
                let record = EscalationRecord::new(
                    &conversation.thread_id,
                    EscalationReason::Ambiguous,
                    &event.content,
                )
                .with_suppressed_draft(&draft);
                self.store.insert_escalation(&record).await?;
                info!(thread_id = %conversation.thread_id, "Reply drafted but held");
                Ok(EventOutcome::Suppressed)
            }
        }
    }

    async fn draft_for(
        &self,
        conversation: &Conversation,
        event: &InboundEvent,
    ) -> Result<String> {
        let context =
            ConversationContext::from_conversation(conversation, &self.profile, &event.content);
        let draft = self.generator.draft(&context).await?;
        Ok(draft.content)
    }

    fn outbound_route(
        &self,
        conversation: &Conversation,
        event: &InboundEvent,
    ) -> Option<(Arc<dyn ChannelTransport>, String)> {
        match event.channel {
            Channel::Email => event
                .sender
                .clone()
                .map(|recipient| (Arc::clone(&self.email), recipient)),
            // The thread id carries the phone number.
            Channel::Sms => Some((Arc::clone(&self.sms), conversation.thread_id.clone())),
            Channel::Interview => None,
        }
    }

    /// Start (or reuse) the interview session for a thread.
    ///
    /// At most one session per thread is live; replays of the same link
    /// find the existing session instead of opening a second browser.
    async fn start_session(
        &self,
        conversation: &mut Conversation,
        url: &str,
    ) -> Result<Option<Uuid>> {
        if let Some(existing) = self
            .store
            .active_session_for_thread(&conversation.thread_id)
            .await?
        {
            debug!(
                thread_id = %conversation.thread_id,
                session_id = %existing.session_id,
                "Interview session already live"
            );
            return Ok(Some(existing.session_id));
        }

        let mut session =
            InterviewSession::new(&conversation.thread_id, url, self.headless);
        session.company = conversation.counterpart.company.clone();
        session.position = conversation.counterpart.position.clone();
        session.version = self.store.save_session(&session).await?;

        if conversation.stage.can_transition_to(Stage::Interviewing) {
            conversation.set_stage(Stage::Interviewing);
        }

        info!(
            thread_id = %conversation.thread_id,
            session_id = %session.session_id,
            url,
            "Starting interview session"
        );

        let run_result = self.controller.run(&mut session, &self.profile).await;
        let session_id = session.session_id;
        session.version = self.store.save_session(&session).await?;

        match run_result {
            Ok(SessionOutcome::Completed { questions_answered }) => {
                info!(session_id = %session_id, questions_answered, "Interview session completed");
            }
            Ok(SessionOutcome::NeedsReview {
                question,
                draft_answer,
            }) => {
                let mut record = EscalationRecord::new(
                    &conversation.thread_id,
                    EscalationReason::Ambiguous,
                    &question,
                );
                record.payload["kind"] = serde_json::json!("interview_review");
                record.payload["session_id"] = serde_json::json!(session_id);
                if let Some(draft) = &draft_answer {
                    record = record.with_suppressed_draft(draft);
                }
                self.store.insert_escalation(&record).await?;
                info!(session_id = %session_id, "Interview session held for review");
            }
            Err(err) => {
                // Session state already records the failure; surface it
                // for review rather than failing the whole event.
                let mut record = EscalationRecord::new(
                    &conversation.thread_id,
                    EscalationReason::Ambiguous,
                    &format!("Interview session failed: {err}"),
                );
                record.payload["session_id"] = serde_json::json!(session_id);
                self.store.insert_escalation(&record).await?;
                warn!(session_id = %session_id, error = %err, "Interview session failed");
            }
        }

        Ok(Some(session_id))
    }

    async fn dead_letter(&self, event: &InboundEvent, reason: &str) -> Result<()> {
        let payload = serde_json::to_value(event)
            .map_err(|e| Error::Store(StoreError::Serialization(e.to_string())))?;
        let letter = DeadLetter::new(&event.thread_id, payload, reason);
        self.store.insert_dead_letter(&letter).await?;

        if let GateDecision::Escalate(gate_reason) = self.gate.decide_failed() {
            let record = EscalationRecord::new(&event.thread_id, gate_reason, &event.content);
            self.store.insert_escalation(&record).await?;
        }
        error!(
            thread_id = %event.thread_id,
            dead_letter_id = %letter.id,
            reason,
            "Event dead-lettered"
        );
        Ok(())
    }

    // ── Introspection ───────────────────────────────────────────────

    pub async fn status(&self) -> Result<StatusReport> {
        let (conversations, escalations, dead) = futures::future::try_join3(
            self.store.list_conversations(),
            self.store.open_escalations(),
            self.store.dead_letters(),
        )
        .await?;
        let mut by_stage: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_channel: BTreeMap<String, usize> = BTreeMap::new();
        for conv in &conversations {
            *by_stage.entry(conv.stage.to_string()).or_default() += 1;
            *by_channel.entry(conv.channel.to_string()).or_default() += 1;
        }
        Ok(StatusReport {
            conversations: conversations.len(),
            by_stage,
            by_channel,
            open_escalations: escalations.len(),
            dead_letters: dead.len(),
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// One poll-and-process cycle. Returns the number of events handled.
    pub async fn run_once(&self) -> Result<usize> {
        let messages = self.email.fetch_new().await?;
        let mut handled = 0;
        for raw in messages {
            let event = self.normalizer.normalize_email(raw);
            let outcome = self.handle_event(event).await?;
            debug!(?outcome, "Event processed");
            handled += 1;
        }
        Ok(handled)
    }

    // ── Daemon loop ─────────────────────────────────────────────────

    /// Poll channels and process events until `shutdown` fires, then
    /// drain in-flight lanes within the grace period.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (queue_tx, mut queue_rx) = mpsc::channel::<InboundEvent>(self.config.queue_capacity);

        let poller = {
            let this = Arc::clone(&self);
            let mut shutdown_rx = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(this.config.poll_interval);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            match this.email.fetch_new().await {
                                Ok(messages) => {
                                    for raw in messages {
                                        let event = this.normalizer.normalize_email(raw);
                                        if queue_tx.send(event).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => error!(error = %e, "Channel poll failed"),
                            }
                        }
                        _ = shutdown_rx.changed() => return,
                    }
                }
            })
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut lanes: HashMap<String, mpsc::UnboundedSender<InboundEvent>> = HashMap::new();
        let mut lane_tasks = JoinSet::new();

        loop {
            tokio::select! {
                maybe = queue_rx.recv() => match maybe {
                    Some(event) => {
                        let mut event = event;
                        loop {
                            let lane = lanes.entry(event.thread_id.clone()).or_insert_with(|| {
                                let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
                                let this = Arc::clone(&self);
                                let permits = Arc::clone(&semaphore);
                                lane_tasks.spawn(async move {
                                    loop {
                                        // Idle lanes exit so the lane map
                                        // stays bounded by active threads.
                                        let event = match tokio::time::timeout(
                                            this.config.lane_idle_timeout,
                                            rx.recv(),
                                        )
                                        .await
                                        {
                                            Ok(Some(event)) => event,
                                            Ok(None) | Err(_) => return,
                                        };
                                        let permit = match permits.acquire().await {
                                            Ok(p) => p,
                                            Err(_) => return,
                                        };
                                        match this.handle_event(event).await {
                                            Ok(outcome) => debug!(?outcome, "Event processed"),
                                            Err(e) => error!(error = %e, "Event handling failed"),
                                        }
                                        drop(permit);
                                    }
                                });
                                tx
                            });
                            match lane.send(event) {
                                Ok(()) => break,
                                // The lane idled out between lookup and
                                // send; rebuild it and redeliver.
                                Err(mpsc::error::SendError(returned)) => {
                                    lanes.remove(&returned.thread_id);
                                    event = returned;
                                }
                            }
                        }
                    }
                    None => break,
                },
                Some(_) = lane_tasks.join_next(), if !lane_tasks.is_empty() => {
                    lanes.retain(|_, lane| !lane.is_closed());
                }
                _ = shutdown.changed() => break,
            }
        }

        // Close lanes and let in-flight work finish.
        drop(lanes);
        info!(
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Draining in-flight events"
        );
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while lane_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown grace expired with events still in flight");
            lane_tasks.abort_all();
        }
        poller.abort();
        info!("Orchestrator stopped");
        Ok(())
    }
}

/// Prefix a subject for a reply unless it already has one.
fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}
