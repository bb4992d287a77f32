use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    /// `Retry-After` value: whole seconds, at least one
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateDecision::Allowed { .. } => None,
            RateDecision::Limited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
        }
    }
}

/// Fixed-window counter keyed by client identity.
///
/// Process-local and best-effort: every instance keeps its own view.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    window: Duration,
    max_requests: u32,
    gc_threshold: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u32, gc_threshold: usize) -> Self {
        Self {
            window,
            max_requests,
            gc_threshold,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_requests, config.gc_threshold)
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            reset_at: now,
        });

        let decision = if now >= entry.reset_at {
            *entry = Entry {
                count: 1,
                reset_at: now + self.window,
            };
            RateDecision::Allowed {
                remaining: self.max_requests.saturating_sub(1),
            }
        } else if entry.count >= self.max_requests {
            RateDecision::Limited {
                retry_after: entry.reset_at - now,
            }
        } else {
            entry.count += 1;
            RateDecision::Allowed {
                remaining: self.max_requests - entry.count,
            }
        };

        if entries.len() > self.gc_threshold {
            entries.retain(|_, entry| now < entry.reset_at);
        }
        decision
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }
}
