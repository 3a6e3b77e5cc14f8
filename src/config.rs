use std::time::Duration;

/// Engine tuning knobs, read once at startup. Every value has a default
/// suitable for a single-instance deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL for the cached full resolved set of a (user, tenant) pair.
    pub set_ttl: Duration,
    /// TTL for cached point decisions; shorter than the set TTL.
    pub decision_ttl: Duration,
    /// Upper bound on any single cache round-trip; a timeout is a miss.
    pub cache_timeout: Duration,
    /// Bounded audit queue depth before records are dropped with a warning.
    pub audit_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            set_ttl: Duration::from_secs(300),
            decision_ttl: Duration::from_secs(30),
            cache_timeout: Duration::from_millis(50),
            audit_queue_depth: 1024,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            set_ttl: env_secs("ACCESS_SET_TTL_SECS").unwrap_or(defaults.set_ttl),
            decision_ttl: env_secs("ACCESS_DECISION_TTL_SECS").unwrap_or(defaults.decision_ttl),
            cache_timeout: env_millis("ACCESS_CACHE_TIMEOUT_MS").unwrap_or(defaults.cache_timeout),
            audit_queue_depth: std::env::var("ACCESS_AUDIT_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.audit_queue_depth),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
