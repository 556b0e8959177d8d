//! Retry registry for failed forward attempts.
//!
//! One entry per message id, exponential backoff with jitter, capped retry
//! count, and a time-based sweep so permanently failing messages cannot grow
//! the registry without bound.

use crate::config::RetryConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use gateway_types::{MessageId, RawMessage};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bookkeeping for one failing message.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub message: RawMessage,
    /// Failed attempts recorded so far
    pub retry_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: String,
}

/// Shared registry of messages awaiting re-forward.
pub struct RetryRegistry {
    entries: DashMap<MessageId, RetryEntry>,
    config: RetryConfig,
}

impl RetryRegistry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Backoff delay for a given failure count, jitter excluded:
    /// `base * 2^min(count, 10)`, capped.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let shifted = self
            .config
            .base_delay_secs
            .saturating_mul(1u64 << retry_count.min(10));
        Duration::from_secs(shifted.min(self.config.max_delay_secs))
    }

    fn jittered_delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay(retry_count);
        let jitter = rand::thread_rng().gen_range(0.0..=self.config.jitter_fraction);
        let with_jitter = base.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(with_jitter.min(self.config.max_delay_secs as f64))
    }

    /// Record a failed forward attempt, creating or updating the entry.
    pub fn record_failure(&self, message: RawMessage, error: impl Into<String>) {
        let error = error.into();
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(message.id.clone())
            .or_insert_with(|| RetryEntry {
                message: message.clone(),
                retry_count: 0,
                last_attempt_at: now,
                next_eligible_at: now,
                last_error: String::new(),
            });
        entry.retry_count += 1;
        entry.last_attempt_at = now;
        let delay = self.jittered_delay(entry.retry_count);
        entry.next_eligible_at = now
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(
                self.config.max_delay_secs as i64,
            ));
        entry.last_error = error;
        entry.message = message;
        debug!(
            message = %entry.message.id,
            retries = entry.retry_count,
            next_eligible = %entry.next_eligible_at,
            "forward failure recorded"
        );
    }

    /// Remove the entry after a successful forward. Returns whether an entry
    /// existed.
    pub fn on_success(&self, id: &MessageId) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            info!(message = %id, "retry entry cleared after success");
        }
        removed
    }

    /// Messages eligible for another attempt right now.
    ///
    /// Each handed-out entry has its eligibility pushed forward under the map
    /// guard, so concurrent sweeps never double-dispatch the same id.
    pub fn take_due(&self) -> Vec<RawMessage> {
        let now = Utc::now();
        let mut due = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.retry_count >= self.config.max_retries {
                continue;
            }
            if entry.next_eligible_at > now {
                continue;
            }
            entry.last_attempt_at = now;
            let hold = self.jittered_delay(entry.retry_count);
            entry.next_eligible_at = now
                + ChronoDuration::from_std(hold)
                    .unwrap_or_else(|_| ChronoDuration::seconds(self.config.max_delay_secs as i64));
            due.push(entry.message.clone());
        }
        due
    }

    /// Whether another attempt for this id would be allowed at all.
    pub fn can_retry(&self, id: &MessageId) -> bool {
        self.entries
            .get(id)
            .map(|e| e.retry_count < self.config.max_retries)
            .unwrap_or(true)
    }

    pub fn get(&self, id: &MessageId) -> Option<RetryEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop exhausted entries past the grace period and any entry past the
    /// absolute age ceiling. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let grace = ChronoDuration::seconds(self.config.exhausted_grace_secs as i64);
        let ceiling = ChronoDuration::seconds(self.config.absolute_ceiling_secs as i64);
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            let age = now - entry.last_attempt_at;
            let exhausted_and_stale =
                entry.retry_count >= self.config.max_retries && age > grace;
            let beyond_ceiling = age > ceiling;
            if exhausted_and_stale || beyond_ceiling {
                warn!(
                    message = %id,
                    retries = entry.retry_count,
                    last_error = %entry.last_error,
                    "dropping expired retry entry"
                );
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::DeviceId;

    fn msg(id: &str) -> RawMessage {
        RawMessage::new(MessageId::from(id), DeviceId::from("d1"), "GENERIC", "X|\r")
    }

    fn registry() -> RetryRegistry {
        RetryRegistry::new(RetryConfig::default())
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let registry = registry();
        let mut previous = Duration::ZERO;
        for count in 0..20 {
            let delay = registry.base_delay(count);
            assert!(delay >= previous, "delay shrank at count {count}");
            assert!(delay.as_secs() <= RetryConfig::default().max_delay_secs);
            previous = delay;
        }
        // Exponent is clamped, so far-out counts share the capped delay.
        assert_eq!(registry.base_delay(10), registry.base_delay(15));
    }

    #[test]
    fn three_failures_count_to_three_and_fourth_is_refused() {
        let registry = registry();
        let id = MessageId::from("m1");
        for _ in 0..3 {
            registry.record_failure(msg("m1"), "connection refused");
        }
        let entry = registry.get(&id).expect("entry exists");
        assert_eq!(entry.retry_count, 3);
        assert!(!registry.can_retry(&id));
        // Eligible by time or not, an exhausted entry is never handed out.
        assert!(registry.take_due().iter().all(|m| m.id != id));
    }

    #[test]
    fn success_removes_entry_permanently() {
        let registry = registry();
        registry.record_failure(msg("m2"), "timeout");
        assert_eq!(registry.len(), 1);
        assert!(registry.on_success(&MessageId::from("m2")));
        assert!(registry.is_empty());
        assert!(!registry.on_success(&MessageId::from("m2")));
    }

    #[test]
    fn entry_not_due_before_backoff_elapses() {
        let registry = registry();
        registry.record_failure(msg("m3"), "timeout");
        // First backoff is at least base seconds out.
        assert!(registry.take_due().is_empty());
    }

    #[test]
    fn sweep_removes_exhausted_stale_entries() {
        let config = RetryConfig {
            exhausted_grace_secs: 0,
            ..RetryConfig::default()
        };
        let registry = RetryRegistry::new(config);
        for _ in 0..3 {
            registry.record_failure(msg("m4"), "down");
        }
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.sweep(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let registry = registry();
        registry.record_failure(msg("m5"), "down");
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.len(), 1);
    }
}
