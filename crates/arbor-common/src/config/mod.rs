//! Engine configuration.
//!
//! [`ArborConfig`] gathers the knobs of the executor, the B+Tree and the raw
//! store. Every component also offers a constructor taking explicit values, so
//! tests can build isolated instances without going through a config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CREATE_WAIT, DEFAULT_MAX_STEAL_DEPTH, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL,
    MAX_PAGE_SIZE, MIN_PAGE_SIZE, WORKERS_PER_CPU,
};
use crate::error::{ArborError, ArborResult};

/// Main engine configuration.
///
/// # Example
///
/// ```rust
/// use arbor_common::config::ArborConfig;
///
/// let config = ArborConfig::default().with_page_size(16).with_worker_threads(4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.effective_workers(), 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArborConfig {
    /// Worker threads in the executor pool. `None` sizes the pool from the
    /// available parallelism.
    pub worker_threads: Option<usize>,

    /// Maximum entries per B+Tree node.
    /// Default: 64
    pub page_size: usize,

    /// How long create-if-absent waits for a colliding object's deletion.
    pub create_wait: Duration,

    /// Maximum nesting of work-stealing waits on one thread.
    pub max_steal_depth: usize,

    /// How long an idle waiter parks before re-checking the run queue.
    pub poll_interval: Duration,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            page_size: DEFAULT_PAGE_SIZE,
            create_wait: DEFAULT_CREATE_WAIT,
            max_steal_depth: DEFAULT_MAX_STEAL_DEPTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ArborConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a small configuration for tests: few workers, tiny pages so
    /// splits and merges happen early.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            worker_threads: Some(4),
            page_size: MIN_PAGE_SIZE,
            create_wait: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }

    /// Sets the B+Tree page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the create-if-absent wait period.
    #[must_use]
    pub fn with_create_wait(mut self, wait: Duration) -> Self {
        self.create_wait = wait;
        self
    }

    /// Sets the maximum work-stealing nesting depth.
    #[must_use]
    pub fn with_max_steal_depth(mut self, depth: usize) -> Self {
        self.max_steal_depth = depth;
        self
    }

    /// Returns the number of workers the executor will start.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * WORKERS_PER_CPU)
                .unwrap_or(WORKERS_PER_CPU)
        })
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> ArborResult<()> {
        if self.worker_threads == Some(0) {
            return Err(ArborError::invalid_config(
                "worker_threads must be at least 1",
            ));
        }

        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(ArborError::invalid_config(format!(
                "page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(ArborError::invalid_config("poll_interval must be non-zero"));
        }

        Ok(())
    }
}
