//! Browser driver abstraction for automated interview pages.
//!
//! The session controller drives a [`BrowserDriver`] trait object, so
//! real automation backends and test doubles plug in the same way. The
//! bundled [`HttpDriver`] is read-only: it can open and extract, and
//! reports interaction as unsupported, which routes the session to
//! escalation instead of failing silently.

pub mod http_driver;
pub mod pool;

pub use http_driver::HttpDriver;
pub use pool::{BrowserLease, BrowserPool};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::InteractionError;

/// Opaque handle to an open page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle(pub Uuid);

impl PageHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One visible element on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageElement {
    pub tag: String,
    pub text: String,
}

/// Snapshot of what a page currently shows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    /// Flattened visible text.
    pub text: String,
    /// Structured elements worth inspecting (headings, code blocks).
    pub elements: Vec<PageElement>,
    /// Button labels.
    pub buttons: Vec<String>,
    /// Whether the page has a text input to answer into.
    pub has_answer_field: bool,
}

/// An action the controller may ask the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Click the element whose text matches `target`.
    Click { target: String },
    /// Fill the answer field with `value`.
    FillAnswer { value: String },
    /// Submit the current form.
    Submit,
}

impl PageAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::FillAnswer { .. } => "fill_answer",
            Self::Submit => "submit",
        }
    }
}

/// Backend-agnostic browser automation surface.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a page and return a handle to it.
    async fn open(&self, url: &str, headless: bool) -> Result<PageHandle, InteractionError>;

    /// Snapshot the page's current content.
    async fn content(&self, handle: &PageHandle) -> Result<PageContent, InteractionError>;

    /// Perform an action on the page.
    async fn interact(
        &self,
        handle: &PageHandle,
        action: &PageAction,
    ) -> Result<(), InteractionError>;

    /// Close the page. Idempotent.
    async fn close(&self, handle: &PageHandle) -> Result<(), InteractionError>;
}

// ── Page analysis ───────────────────────────────────────────────────

/// What the page is asking for next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePlan {
    /// A code snippet is shown for review.
    AnalyzeCode,
    /// A question needs answering.
    AnswerQuestion,
    /// A navigation button should be clicked.
    Click(String),
    /// Nothing actionable recognized.
    Inspect,
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\w*\n?(.*?)```").unwrap());

/// Decide the next step from a content snapshot.
pub fn plan_next(content: &PageContent) -> PagePlan {
    let lower = content.text.to_lowercase();

    if extract_code(content).is_some() {
        return PagePlan::AnalyzeCode;
    }
    if extract_question(content).is_some() {
        return PagePlan::AnswerQuestion;
    }
    for label in ["start", "begin", "next", "continue"] {
        if content
            .buttons
            .iter()
            .any(|b| b.to_lowercase().contains(label))
            || lower.contains(&format!("click {label}"))
        {
            return PagePlan::Click(label.to_string());
        }
    }
    PagePlan::Inspect
}

/// Pull a code snippet out of the page, fenced blocks first, then
/// `code`/`pre` elements that look like real code.
pub fn extract_code(content: &PageContent) -> Option<String> {
    if let Some(caps) = CODE_FENCE.captures(&content.text) {
        let code = caps.get(1)?.as_str().trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    content
        .elements
        .iter()
        .filter(|e| e.tag == "code" || e.tag == "pre")
        .map(|e| e.text.trim())
        .find(|t| {
            t.len() > 20
                && ["def ", "function", "class ", "import ", "fn ", "="]
                    .iter()
                    .any(|kw| t.contains(kw))
        })
        .map(String::from)
}

const QUESTION_KEYWORDS: [&str; 6] = ["question", "what", "how", "why", "explain", "describe"];

/// Pull the question text out of the page. Prefers structured elements,
/// falls back to scanning sentences for question marks.
pub fn extract_question(content: &PageContent) -> Option<String> {
    for elem in &content.elements {
        let lower = elem.text.to_lowercase();
        if QUESTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
            && (elem.text.contains('?') || elem.text.len() > 20)
        {
            return Some(elem.text.trim().to_string());
        }
    }

    content
        .text
        .split(['.', '\n'])
        .map(str::trim)
        .find(|s| {
            s.contains('?')
                && QUESTION_KEYWORDS
                    .iter()
                    .any(|kw| s.to_lowercase().contains(kw))
        })
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageContent {
        PageContent {
            url: "https://hr.example.com/interview/1".into(),
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn extracts_fenced_code() {
        let content = page("Review this:\n```python\ndef add(a, b):\n    return a + b\n```");
        let code = extract_code(&content).unwrap();
        assert!(code.starts_with("def add"));
        assert!(!code.contains("```"));
    }

    #[test]
    fn extracts_code_from_pre_element() {
        let mut content = page("Review the snippet below.");
        content.elements.push(PageElement {
            tag: "pre".into(),
            text: "function greet(name) { return 'hi ' + name; }".into(),
        });
        assert!(extract_code(&content).is_some());
    }

    #[test]
    fn short_pre_element_is_not_code() {
        let mut content = page("hello");
        content.elements.push(PageElement {
            tag: "pre".into(),
            text: "x = 1".into(),
        });
        assert!(extract_code(&content).is_none());
    }

    #[test]
    fn extracts_question_from_element() {
        let mut content = page("irrelevant");
        content.elements.push(PageElement {
            tag: "h2".into(),
            text: "Question 1: Explain the Page Object Model.".into(),
        });
        assert_eq!(
            extract_question(&content).as_deref(),
            Some("Question 1: Explain the Page Object Model.")
        );
    }

    #[test]
    fn extracts_question_from_text() {
        let content = page("Welcome. What is your approach to flaky tests? Good luck");
        let q = extract_question(&content).unwrap();
        assert!(q.contains("flaky tests?"));
    }

    #[test]
    fn plan_prefers_code_over_question() {
        let content = page("What does this do?\n```\ndef f():\n    pass\n```");
        assert_eq!(plan_next(&content), PagePlan::AnalyzeCode);
    }

    #[test]
    fn plan_clicks_start_button() {
        let mut content = page("Welcome to your assessment.");
        content.buttons.push("Start Interview".into());
        assert_eq!(plan_next(&content), PagePlan::Click("start".into()));
    }

    #[test]
    fn plan_falls_back_to_inspect() {
        let content = page("Loading.");
        assert_eq!(plan_next(&content), PagePlan::Inspect);
    }
}
