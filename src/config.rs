//! Runtime configuration.
//!
//! Every timing constant of the synchronization protocol lives here so that
//! node and router processes can be tuned without a rebuild. Defaults are the
//! reference values; `from_env` overrides them from `PROFILE_SYNC_*` variables.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_ADMISSION_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_ADMISSION_ATTEMPTS: usize = 10;
pub const DEFAULT_SAVE_ACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(20);
pub const DEFAULT_STORE_WORKERS: usize = 4;
pub const DEFAULT_STORE_READ_ATTEMPTS: usize = 3;
pub const DEFAULT_STORE_RETRY_DELAY: Duration = Duration::from_millis(150);

/// What the router does when a save acknowledgement never arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Move the session anyway. Mutations made after the timeout may be
    /// clobbered by the late save on the old node.
    FailOpen,
    /// Refuse the move and keep the session where it is.
    FailClosed,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(TimeoutPolicy::FailOpen),
            "closed" | "fail-closed" | "fail_closed" => Ok(TimeoutPolicy::FailClosed),
            other => Err(format!("unknown timeout policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// TTL of `lock:profile:<owner_id>` while a disconnect save runs.
    pub lock_ttl: Duration,
    pub admission_retry_interval: Duration,
    pub admission_max_attempts: usize,
    pub save_ack_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub shutdown_deadline: Duration,
    /// Maximum number of concurrent store calls per process.
    pub store_workers: usize,
    pub store_read_attempts: usize,
    pub store_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            admission_retry_interval: DEFAULT_ADMISSION_INTERVAL,
            admission_max_attempts: DEFAULT_ADMISSION_ATTEMPTS,
            save_ack_timeout: DEFAULT_SAVE_ACK_TIMEOUT,
            timeout_policy: TimeoutPolicy::FailOpen,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            store_workers: DEFAULT_STORE_WORKERS,
            store_read_attempts: DEFAULT_STORE_READ_ATTEMPTS,
            store_retry_delay: DEFAULT_STORE_RETRY_DELAY,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_value::<u64>("PROFILE_SYNC_LOCK_TTL_MS") {
            config.lock_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value::<u64>("PROFILE_SYNC_ADMISSION_INTERVAL_MS") {
            config.admission_retry_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_value::<usize>("PROFILE_SYNC_ADMISSION_ATTEMPTS") {
            config.admission_max_attempts = n.max(1);
        }
        if let Some(ms) = env_value::<u64>("PROFILE_SYNC_SAVE_ACK_TIMEOUT_MS") {
            config.save_ack_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = env_value::<TimeoutPolicy>("PROFILE_SYNC_TIMEOUT_POLICY") {
            config.timeout_policy = policy;
        }
        if let Some(ms) = env_value::<u64>("PROFILE_SYNC_SHUTDOWN_DEADLINE_MS") {
            config.shutdown_deadline = Duration::from_millis(ms);
        }
        if let Some(n) = env_value::<usize>("PROFILE_SYNC_STORE_WORKERS") {
            config.store_workers = n.max(1);
        }
        if let Some(n) = env_value::<usize>("PROFILE_SYNC_STORE_READ_ATTEMPTS") {
            config.store_read_attempts = n.max(1);
        }
        if let Some(ms) = env_value::<u64>("PROFILE_SYNC_STORE_RETRY_DELAY_MS") {
            config.store_retry_delay = Duration::from_millis(ms);
        }

        config
    }
}

fn env_value<T>(name: &str) -> Option<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}
