//! Configuration module for the gateway
//!
//! Environment-based configuration with hard defaults. The numeric defaults
//! are field-tuned values carried over from long-running deployments; change
//! them through the environment, not here.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Frame buffer tunables, one engine instance per adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Buffer byte ceiling; exceeding it discards the buffer
    pub max_buffer_bytes: usize,

    /// Idle buffer age before the sweep clears it, in milliseconds
    pub buffer_timeout_ms: u64,

    /// Capacity of each adapter's received-message queue
    pub received_queue_capacity: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 1024 * 1024,
            buffer_timeout_ms: 60_000,
            received_queue_capacity: 500,
        }
    }
}

impl FramingConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_buffer_bytes: env_parse("GATEWAY_MAX_BUFFER_BYTES", d.max_buffer_bytes),
            buffer_timeout_ms: env_parse("GATEWAY_BUFFER_TIMEOUT_MS", d.buffer_timeout_ms),
            received_queue_capacity: env_parse(
                "GATEWAY_RECEIVED_QUEUE_CAPACITY",
                d.received_queue_capacity,
            ),
        }
    }

    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
}

/// Transport-level adapter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connect timeout per attempt, in seconds
    pub connect_timeout_secs: u64,

    /// Connect attempts before `connect` gives up
    pub connect_attempts: u32,

    /// Linear pause between connect attempts, in milliseconds
    pub connect_pause_ms: u64,

    /// Bounded wait inside `receive`, in seconds
    pub receive_wait_secs: u64,

    /// Bounded wait inside the file adapter's `receive`, in seconds
    pub file_receive_wait_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            connect_attempts: 3,
            connect_pause_ms: 1_000,
            receive_wait_secs: 10,
            file_receive_wait_secs: 30,
        }
    }
}

impl TransportConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            connect_timeout_secs: env_parse("GATEWAY_CONNECT_TIMEOUT_SECS", d.connect_timeout_secs),
            connect_attempts: env_parse("GATEWAY_CONNECT_ATTEMPTS", d.connect_attempts),
            connect_pause_ms: env_parse("GATEWAY_CONNECT_PAUSE_MS", d.connect_pause_ms),
            receive_wait_secs: env_parse("GATEWAY_RECEIVE_WAIT_SECS", d.receive_wait_secs),
            file_receive_wait_secs: env_parse(
                "GATEWAY_FILE_RECEIVE_WAIT_SECS",
                d.file_receive_wait_secs,
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_pause(&self) -> Duration {
        Duration::from_millis(self.connect_pause_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_secs)
    }
}

/// Connection state verifier tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Poll interval, in seconds
    pub poll_interval_secs: u64,

    /// Skip re-verification if the state changed within this window, in ms
    pub debounce_ms: u64,

    /// Samples taken per verification round
    pub samples: u32,

    /// Pause between samples, in milliseconds
    pub sample_pause_ms: u64,

    /// Consecutive agreeing rounds before a transition commits
    pub confirmation_threshold: u32,

    /// Supermajority numerator/denominator applied to hit/miss counts
    pub supermajority_num: u32,
    pub supermajority_den: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            debounce_ms: 3_000,
            samples: 3,
            sample_pause_ms: 200,
            confirmation_threshold: 2,
            supermajority_num: 2,
            supermajority_den: 3,
        }
    }
}

impl VerifierConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_secs: env_parse("GATEWAY_VERIFY_INTERVAL_SECS", d.poll_interval_secs),
            debounce_ms: env_parse("GATEWAY_VERIFY_DEBOUNCE_MS", d.debounce_ms),
            samples: env_parse("GATEWAY_VERIFY_SAMPLES", d.samples),
            sample_pause_ms: env_parse("GATEWAY_VERIFY_SAMPLE_PAUSE_MS", d.sample_pause_ms),
            confirmation_threshold: env_parse(
                "GATEWAY_VERIFY_CONFIRMATIONS",
                d.confirmation_threshold,
            ),
            supermajority_num: d.supermajority_num,
            supermajority_den: d.supermajority_den,
        }
    }

    /// Minimum count out of `total` that constitutes a supermajority.
    pub fn supermajority_of(&self, total: u32) -> u32 {
        // ceil(total * num / den)
        (total * self.supermajority_num).div_ceil(self.supermajority_den)
    }
}

/// Queue and batch processor tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Main message queue capacity
    pub queue_capacity: usize,

    /// Batch tick interval, in milliseconds
    pub process_interval_ms: u64,

    /// Messages drained per batch tick
    pub batch_size: usize,

    /// Bounded wait for a batch to finish, in seconds
    pub batch_wait_secs: u64,

    /// Cumulative stats emission interval, in seconds
    pub stats_interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_000,
            process_interval_ms: 5_000,
            batch_size: 50,
            batch_wait_secs: 30,
            stats_interval_secs: 3_600,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_capacity: env_parse("GATEWAY_QUEUE_CAPACITY", d.queue_capacity),
            process_interval_ms: env_parse("GATEWAY_PROCESS_INTERVAL_MS", d.process_interval_ms),
            batch_size: env_parse("GATEWAY_BATCH_SIZE", d.batch_size),
            batch_wait_secs: env_parse("GATEWAY_BATCH_WAIT_SECS", d.batch_wait_secs),
            stats_interval_secs: env_parse("GATEWAY_STATS_INTERVAL_SECS", d.stats_interval_secs),
        }
    }
}

/// Retry registry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base backoff delay, in seconds
    pub base_delay_secs: u64,

    /// Hard cap on any computed delay, in seconds
    pub max_delay_secs: u64,

    /// Jitter fraction added on top of the computed delay (0.2 = up to +20%)
    pub jitter_fraction: f64,

    /// Attempts before a message is considered exhausted
    pub max_retries: u32,

    /// Exhausted entries older than this are swept, in seconds
    pub exhausted_grace_secs: u64,

    /// Any entry older than this is swept regardless of count, in seconds
    pub absolute_ceiling_secs: u64,

    /// Sweep interval, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 1_800,
            jitter_fraction: 0.2,
            max_retries: 3,
            exhausted_grace_secs: 24 * 3_600,
            absolute_ceiling_secs: 7 * 24 * 3_600,
            sweep_interval_secs: 3_600,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_delay_secs: env_parse("GATEWAY_RETRY_BASE_SECS", d.base_delay_secs),
            max_delay_secs: env_parse("GATEWAY_RETRY_MAX_DELAY_SECS", d.max_delay_secs),
            jitter_fraction: env_parse("GATEWAY_RETRY_JITTER", d.jitter_fraction),
            max_retries: env_parse("GATEWAY_MAX_RETRIES", d.max_retries),
            exhausted_grace_secs: env_parse("GATEWAY_RETRY_GRACE_SECS", d.exhausted_grace_secs),
            absolute_ceiling_secs: env_parse("GATEWAY_RETRY_CEILING_SECS", d.absolute_ceiling_secs),
            sweep_interval_secs: env_parse("GATEWAY_RETRY_SWEEP_SECS", d.sweep_interval_secs),
        }
    }
}

/// Downstream forwarding tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Downstream endpoint receiving processed messages
    pub server_address: String,

    /// Per-request timeout, in seconds
    pub request_timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            server_address: "http://127.0.0.1:8080/api/messages".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl ForwardConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            server_address: env::var("GATEWAY_SERVER_ADDRESS").unwrap_or(d.server_address),
            request_timeout_secs: env_parse(
                "GATEWAY_FORWARD_TIMEOUT_SECS",
                d.request_timeout_secs,
            ),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub framing: FramingConfig,
    pub transport: TransportConfig,
    pub verifier: VerifierConfig,
    pub processor: ProcessorConfig,
    pub retry: RetryConfig,
    pub forward: ForwardConfig,

    /// Node id mixed into generated message ids
    pub node_id: u16,

    /// Path to the TOML device manifest
    pub devices_file: String,
}

impl GatewayConfig {
    /// Load complete configuration from environment
    pub fn from_env() -> Self {
        Self {
            framing: FramingConfig::from_env(),
            transport: TransportConfig::from_env(),
            verifier: VerifierConfig::from_env(),
            processor: ProcessorConfig::from_env(),
            retry: RetryConfig::from_env(),
            forward: ForwardConfig::from_env(),
            node_id: env_parse("GATEWAY_NODE_ID", 1),
            devices_file: env::var("GATEWAY_DEVICES_FILE")
                .unwrap_or_else(|_| "devices.toml".to_string()),
        }
    }

    /// Validate all configurations
    pub fn validate(&self) -> Result<(), String> {
        if self.framing.max_buffer_bytes == 0 {
            return Err("Buffer ceiling must be greater than 0".to_string());
        }
        if self.framing.received_queue_capacity == 0 {
            return Err("Received queue capacity must be greater than 0".to_string());
        }
        if self.processor.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".to_string());
        }
        if self.processor.batch_size == 0 {
            return Err("Batch size must be greater than 0".to_string());
        }
        if self.verifier.samples == 0 {
            return Err("Verifier sample count must be greater than 0".to_string());
        }
        if self.verifier.confirmation_threshold == 0 {
            return Err("Confirmation threshold must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err("Retry jitter fraction must be within 0.0..=1.0".to_string());
        }
        if self.forward.server_address.is_empty() {
            return Err("Server address cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = GatewayConfig::from_env();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_batch_size() {
        let mut config = GatewayConfig::from_env();
        config.processor.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn supermajority_rounds_up() {
        let v = VerifierConfig::default();
        assert_eq!(v.supermajority_of(3), 2);
        assert_eq!(v.supermajority_of(5), 4);
        assert_eq!(v.supermajority_of(6), 4);
    }
}
