//! Read-only HTTP driver.
//!
//! Fetches interview pages over plain HTTP and extracts text, code
//! blocks, and button labels from the markup. It cannot click or type;
//! `interact` returns `Unsupported`, which the session controller turns
//! into an escalation with the extracted content attached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use tracing::debug;

use crate::browser::{BrowserDriver, PageAction, PageContent, PageElement, PageHandle};
use crate::error::InteractionError;

const BLOCK_TAGS: [&str; 6] = ["code", "pre", "h1", "h2", "h3", "button"];

static TAG_BLOCKS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    BLOCK_TAGS
        .iter()
        .map(|tag| {
            let pattern = format!(r"(?is)<{tag}[^>]*>(.*?)</{tag}>");
            (*tag, Regex::new(&pattern).unwrap())
        })
        .collect()
});
static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static ANSWER_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<(textarea|input[^>]+type=["']?text)"#).unwrap());

pub struct HttpDriver {
    http: reqwest::Client,
    open_pages: Arc<RwLock<HashMap<PageHandle, String>>>,
    load_timeout: Duration,
}

impl HttpDriver {
    pub fn new(load_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            open_pages: Arc::new(RwLock::new(HashMap::new())),
            load_timeout,
        }
    }

    async fn fetch(&self, url: &str) -> Result<PageContent, InteractionError> {
        let response = tokio::time::timeout(self.load_timeout, self.http.get(url).send())
            .await
            .map_err(|_| InteractionError::LoadTimeout {
                timeout: self.load_timeout,
            })?
            .map_err(|e| InteractionError::OpenFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(InteractionError::OpenFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| InteractionError::ExtractionFailed(e.to_string()))?;
        Ok(parse_page(url, &html))
    }
}

/// Turn raw HTML into a [`PageContent`] snapshot.
fn parse_page(url: &str, html: &str) -> PageContent {
    let title = TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()))
        .unwrap_or_default();

    let mut elements = Vec::new();
    let mut buttons = Vec::new();
    for (tag, pattern) in TAG_BLOCKS.iter() {
        for caps in pattern.captures_iter(html) {
            let text = strip_tags(&caps[1]);
            if text.is_empty() {
                continue;
            }
            if *tag == "button" {
                buttons.push(text);
            } else {
                elements.push(PageElement {
                    tag: tag.to_string(),
                    text,
                });
            }
        }
    }

    let without_scripts = SCRIPT_STYLE.replace_all(html, " ");
    let text = strip_tags(&without_scripts);

    PageContent {
        url: url.to_string(),
        title,
        text,
        elements,
        buttons,
        has_answer_field: ANSWER_FIELD.is_match(html),
    }
}

fn strip_tags(html: &str) -> String {
    let text = ANY_TAG.replace_all(html, " ");
    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn open(&self, url: &str, _headless: bool) -> Result<PageHandle, InteractionError> {
        // Validate the page is reachable before handing out a handle.
        self.fetch(url).await?;
        let handle = PageHandle::new();
        self.open_pages
            .write()
            .await
            .insert(handle.clone(), url.to_string());
        debug!(url, "Opened page over HTTP");
        Ok(handle)
    }

    async fn content(&self, handle: &PageHandle) -> Result<PageContent, InteractionError> {
        let url = {
            let pages = self.open_pages.read().await;
            pages
                .get(handle)
                .cloned()
                .ok_or(InteractionError::StaleHandle)?
        };
        self.fetch(&url).await
    }

    async fn interact(
        &self,
        handle: &PageHandle,
        action: &PageAction,
    ) -> Result<(), InteractionError> {
        let pages = self.open_pages.read().await;
        if !pages.contains_key(handle) {
            return Err(InteractionError::StaleHandle);
        }
        Err(InteractionError::Unsupported {
            action: action.label().to_string(),
        })
    }

    async fn close(&self, handle: &PageHandle) -> Result<(), InteractionError> {
        self.open_pages.write().await.remove(handle);
        Ok(())
    }
}
