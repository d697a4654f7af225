//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix shared by every environment variable read by [`WorkerPoolConfig::from_env`].
pub const ENV_PREFIX: &str = "PARVI_";

/// Smallest stack accepted for a dispatch thread.
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Worker pool configuration.
///
/// Every field has a default, so partial JSON documents and partial
/// environments are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of workers the builder asks its factory for.
    pub worker_count: usize,
    /// Maximum queued operations before `submit` rejects.
    pub max_queue_depth: usize,
    /// Re-dispatches allowed after transient failures, per operation.
    pub max_retries: u32,
    /// Pause before each re-dispatch, in milliseconds.
    pub retry_backoff_ms: u64,
    /// How long `shutdown` waits for all dispatch threads together, in
    /// milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Stack size of each dispatch thread, in bytes.
    pub thread_stack_size: usize,
    /// Name prefix of dispatch threads; the worker index is appended.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            max_queue_depth: 1024,
            max_retries: 3,
            retry_backoff_ms: 0,
            shutdown_timeout_ms: 5000,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "parvi-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers built by the pool builder.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set how many times one operation may be re-dispatched.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Retry transient failures for as long as the pool is running.
    #[must_use]
    pub const fn with_unlimited_retries(mut self) -> Self {
        self.max_retries = u32::MAX;
        self
    }

    /// Set the pause before each re-dispatch.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set how long `shutdown` waits for the dispatch threads. Rounded up to
    /// whole milliseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_nanos().div_ceil(1_000_000) as u64;
        self
    }

    /// Set the dispatch thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the dispatch thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Pause before each re-dispatch.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Total time `shutdown` waits for the dispatch threads.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!("thread_stack_size must be at least {MIN_STACK_SIZE} bytes"));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// A parse error or a validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `PARVI_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// A message naming a variable that does not parse, or a validation
    /// message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (keys carry the
    /// `PARVI_` prefix).
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("WORKER_COUNT") {
            cfg.worker_count = parse_var("WORKER_COUNT", &v)?;
        }
        if let Some(v) = get("MAX_QUEUE_DEPTH") {
            cfg.max_queue_depth = parse_var("MAX_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            cfg.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            cfg.retry_backoff_ms = parse_var("RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT_MS") {
            cfg.shutdown_timeout_ms = parse_var("SHUTDOWN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("THREAD_STACK_SIZE") {
            cfg.thread_stack_size = parse_var("THREAD_STACK_SIZE", &v)?;
        }
        if let Some(v) = get("THREAD_NAME_PREFIX") {
            cfg.thread_name_prefix = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}={value:?} is invalid: {e}"))
}
