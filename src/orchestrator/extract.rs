//! Counterpart detail extraction from inbound events.
//!
//! Best effort only. Extracted fields fill empty slots on the
//! conversation's counterpart record and never overwrite values already
//! learned (see `Counterpart::merge`).

use regex::Regex;
use std::sync::LazyLock;

use crate::conversation::model::Counterpart;
use crate::normalizer::InboundEvent;

static COMPANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:company|client|employer)\s*[:\-]\s*([A-Z][\w .,&'-]{1,40})").unwrap()
});
static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?:position|role|title|opening)\s*(?:of|for|:|\-)\s*([A-Z][\w /().&'-]{2,50})",
    )
    .unwrap()
});
static SALARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s?\d{2,3}(?:[,.]\d{3})?(?:\s?(?:-|to)\s?\$?\s?\d{2,3}(?:[,.]\d{3})?)?\s*(?:/|per\s?)?(?:hr|hour|yr|year|annum)?").unwrap()
});
static ARRANGEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(fully remote|remote|hybrid|on[- ]?site)\b").unwrap());

/// Free and gateway domains that say nothing about the employer.
const GENERIC_DOMAINS: [&str; 7] = [
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "aol.com",
    "txt.att.net",
    "vtext.com",
];

/// Pull counterpart details out of one event.
pub fn extract_counterpart(event: &InboundEvent) -> Counterpart {
    let mut counterpart = Counterpart::default();

    if let Some(caps) = COMPANY.captures(&event.content) {
        counterpart.company = Some(caps[1].trim().to_string());
    } else if let Some(sender) = &event.sender {
        counterpart.company = company_from_domain(sender);
    }

    if let Some(caps) = POSITION
        .captures(&event.content)
        .or_else(|| event.subject.as_deref().and_then(|s| POSITION.captures(s)))
    {
        counterpart.position = Some(caps[1].trim().trim_end_matches('.').to_string());
    }

    if let Some(m) = SALARY.find(&event.content) {
        counterpart.salary_range = Some(m.as_str().trim().to_string());
    }

    if let Some(caps) = ARRANGEMENT.captures(&event.content) {
        counterpart.work_arrangement = Some(caps[1].to_lowercase());
    }

    if let Some(sender) = &event.sender {
        counterpart.contact = Some(sender.clone());
    }

    counterpart
}

/// Derive a company name from the sender's domain, unless it's a
/// generic mail provider.
fn company_from_domain(sender: &str) -> Option<String> {
    let domain = sender.split('@').nth(1)?.to_lowercase();
    if GENERIC_DOMAINS.contains(&domain.as_str()) {
        return None;
    }
    let stem = domain.split('.').next()?;
    if stem.is_empty() {
        return None;
    }
    let mut chars = stem.chars();
    let first = chars.next()?.to_uppercase().to_string();
    Some(format!("{first}{}", chars.as_str()))
}
