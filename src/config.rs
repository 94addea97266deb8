//! Configuration types.

use std::time::Duration;

/// Read an env var and parse it, falling back to a default.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Orchestrator runtime configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the inbound event queue.
    pub queue_capacity: usize,
    /// Maximum number of threads processed concurrently.
    pub max_concurrency: usize,
    /// Per-event retry attempts before dead-lettering.
    pub event_retry_attempts: u32,
    /// Poll interval for channel fetches.
    pub poll_interval: Duration,
    /// Grace period for in-flight events on shutdown.
    pub shutdown_grace: Duration,
    /// Idle time before a per-thread lane is torn down.
    pub lane_idle_timeout: Duration,
    /// Whether generated replies may be sent without approval.
    pub auto_reply_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrency: 8,
            event_retry_attempts: 3,
            poll_interval: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            lane_idle_timeout: Duration::from_secs(120),
            auto_reply_enabled: true,
        }
    }
}

impl OrchestratorConfig {
    /// Build config from environment variables, with defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_capacity: env_parse("RECRUIT_QUEUE_CAPACITY", d.queue_capacity),
            max_concurrency: env_parse("RECRUIT_MAX_CONCURRENCY", d.max_concurrency),
            event_retry_attempts: env_parse("RECRUIT_EVENT_RETRIES", d.event_retry_attempts),
            poll_interval: Duration::from_secs(env_parse("CHECK_INTERVAL_SECONDS", 300u64)),
            shutdown_grace: Duration::from_secs(env_parse("RECRUIT_SHUTDOWN_GRACE_SECS", 30u64)),
            lane_idle_timeout: Duration::from_secs(env_parse("RECRUIT_LANE_IDLE_SECS", 120u64)),
            auto_reply_enabled: std::env::var("AUTO_REPLY_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(d.auto_reply_enabled),
        }
    }
}

/// Escalation gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Classification confidence below this escalates as ambiguous.
    pub ambiguous_confidence_threshold: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ambiguous_confidence_threshold: 0.5,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ambiguous_confidence_threshold: env_parse(
                "RECRUIT_AMBIGUOUS_THRESHOLD",
                d.ambiguous_confidence_threshold,
            ),
        }
    }
}

/// Response generator retry/timeout configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Timeout for a single generation call.
    pub call_timeout: Duration,
    /// Attempts before giving up and escalating.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            retry_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl GeneratorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            call_timeout: Duration::from_secs(env_parse("RECRUIT_LLM_TIMEOUT_SECS", 60u64)),
            retry_attempts: env_parse("RECRUIT_LLM_RETRIES", d.retry_attempts),
            backoff_base: d.backoff_base,
        }
    }
}

/// Interview session controller configuration.
#[derive(Debug, Clone)]
pub struct InterviewConfig {
    /// Run the browser headless.
    pub headless: bool,
    /// Timeout waiting for a page-load signal.
    pub navigation_timeout: Duration,
    /// Timeout acquiring a browser lease.
    pub lease_timeout: Duration,
    /// Retry attempts per controller state before erroring out.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
    /// Size of the browser lease pool.
    pub pool_size: usize,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            headless: false,
            navigation_timeout: Duration::from_secs(30),
            lease_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            backoff_base: Duration::from_millis(250),
            pool_size: 2,
        }
    }
}

impl InterviewConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            headless: std::env::var("INTERVIEW_HEADLESS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(d.headless),
            navigation_timeout: Duration::from_secs(env_parse(
                "INTERVIEW_NAV_TIMEOUT_SECS",
                30u64,
            )),
            lease_timeout: Duration::from_secs(env_parse("INTERVIEW_LEASE_TIMEOUT_SECS", 10u64)),
            retry_attempts: env_parse("INTERVIEW_RETRIES", d.retry_attempts),
            backoff_base: d.backoff_base,
            pool_size: env_parse("INTERVIEW_POOL_SIZE", d.pool_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.queue_capacity > 0);
        assert!(cfg.max_concurrency > 0);
        assert_eq!(cfg.event_retry_attempts, 3);
        assert!(cfg.auto_reply_enabled);
    }

    #[test]
    fn gate_threshold_default() {
        let cfg = GateConfig::default();
        assert!((cfg.ambiguous_confidence_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn interview_defaults() {
        let cfg = InterviewConfig::default();
        assert!(!cfg.headless);
        assert_eq!(cfg.retry_attempts, 3);
        assert!(cfg.pool_size >= 1);
    }
}
