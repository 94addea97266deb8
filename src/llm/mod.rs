//! Response generation.
//!
//! The pipeline talks to a [`ResponseGenerator`] trait object; the
//! production implementation is [`AnthropicGenerator`] over the Messages
//! API. The generator drafts replies only — whether a draft is sent or
//! held is the escalation gate's call, upstream of here.

pub mod retry;

pub use retry::RetryPolicy;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::conversation::{Channel, Conversation, Direction, Stage, model::Counterpart, Turn};
use crate::error::GenerationError;
use crate::profile::Profile;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const MAX_TOKENS: u32 = 1024;
const CONTEXT_TURNS: usize = 10;

/// Everything a generator needs to draft one reply.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub thread_id: String,
    pub channel: Channel,
    pub stage: Stage,
    pub profile: Profile,
    pub counterpart: Counterpart,
    pub recent_turns: Vec<Turn>,
    /// The inbound content being replied to.
    pub incoming: String,
}

impl ConversationContext {
    pub fn from_conversation(
        conversation: &Conversation,
        profile: &Profile,
        incoming: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: conversation.thread_id.clone(),
            channel: conversation.channel,
            stage: conversation.stage,
            profile: profile.clone(),
            counterpart: conversation.counterpart.clone(),
            recent_turns: conversation.recent_turns(CONTEXT_TURNS).to_vec(),
            incoming: incoming.into(),
        }
    }

    /// System prompt: persona, candidate facts, stage and channel guidance.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are replying to recruiters on behalf of {}, a job candidate. \
             Write in first person as the candidate. Be professional, warm, and brief. \
             Never invent facts not listed below, and never commit to rates, offers, \
             or interview times.\n\n{}",
            self.profile.name,
            self.profile.prompt_context()
        );

        if let Some(company) = &self.counterpart.company {
            prompt.push_str(&format!("\nRecruiting company: {company}"));
        }
        if let Some(position) = &self.counterpart.position {
            prompt.push_str(&format!("\nPosition discussed: {position}"));
        }

        prompt.push_str(&format!("\n\nConversation stage: {}.", self.stage));
        prompt.push_str(match self.stage {
            Stage::InitialContact | Stage::InformationGathering => {
                " Ask for the details still missing: company, role, rate range, \
                 remote policy, and contract type."
            }
            Stage::Screening => {
                " Answer screening questions directly from the candidate facts above. \
                 If a question is not covered by the facts, say you will follow up."
            }
            Stage::Negotiation | Stage::Scheduling => {
                " Acknowledge receipt and say the candidate will follow up shortly. \
                 Do not negotiate or pick times."
            }
            Stage::Interviewing => {
                " Answer the interview question as the candidate would, drawing on \
                 the experience summary and key skills. Be concrete and concise."
            }
            Stage::Declined | Stage::Closed => " Politely close out the thread.",
        });

        match self.channel {
            Channel::Sms => {
                prompt.push_str(
                    "\n\nThis is an SMS conversation. Keep the reply under 160 \
                     characters. No greeting or signature.",
                );
            }
            Channel::Email => {
                prompt.push_str("\n\nThis is an email reply. A short paragraph or two, no subject line.");
            }
            Channel::Interview => {
                prompt.push_str("\n\nThis is a written interview answer. Plain text, no salutation.");
            }
        }

        prompt
    }

    /// User prompt: recent history plus the message being answered.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.recent_turns.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in &self.recent_turns {
                let who = match turn.direction {
                    Direction::Inbound => "Them",
                    Direction::Outbound => "You",
                };
                prompt.push_str(&format!("{who}: {}\n", turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "New message to answer:\n{}\n\nWrite the reply only, no commentary.",
            self.incoming
        ));
        prompt
    }
}

/// A generated reply plus accounting.
#[derive(Debug, Clone)]
pub struct DraftReply {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Pluggable reply generator.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Draft a reply for the given context. Implementations own their
    /// retry behavior; a returned error means the budget is spent.
    async fn draft(&self, context: &ConversationContext) -> Result<DraftReply, GenerationError>;

    fn model_name(&self) -> &str;
}

// ── Anthropic Messages API ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Generator backed by the Anthropic Messages API.
pub struct AnthropicGenerator {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    retry: RetryPolicy,
}

impl AnthropicGenerator {
    pub fn new(api_key: SecretString, model: Option<String>, config: &GeneratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            retry: RetryPolicy::from_config(config),
        }
    }

    async fn call_once(
        &self,
        system: &str,
        user: &str,
    ) -> Result<DraftReply, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(GenerationError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::RequestFailed {
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let content = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse {
                reason: "no text content in response".to_string(),
            })?;

        Ok(DraftReply {
            content,
            model: if parsed.model.is_empty() {
                self.model.clone()
            } else {
                parsed.model
            },
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[async_trait]
impl ResponseGenerator for AnthropicGenerator {
    async fn draft(&self, context: &ConversationContext) -> Result<DraftReply, GenerationError> {
        let system = context.system_prompt();
        let user = context.user_prompt();
        debug!(
            thread_id = %context.thread_id,
            stage = %context.stage,
            channel = %context.channel,
            "Drafting reply"
        );
        self.retry
            .run("anthropic_draft", || self.call_once(&system, &user))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
