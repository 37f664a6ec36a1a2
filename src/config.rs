use std::time::Duration;

/// Upper bound on concurrently running workers, regardless of key count.
pub const MAX_WORKERS: usize = 10;

/// Tuning knobs for a single scheduler run.
///
/// All timings are in milliseconds. The defaults match the pacing the
/// providers tolerate in practice: a rate-limited key is parked for 45s,
/// a worker that finds every key busy waits 2s before looking again.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Requested worker count. Clamped to `1..=MAX_WORKERS` and then capped
    /// by the number of keys when a run starts.
    pub worker_count: usize,
    /// How long a key stays ineligible after a transient provider error.
    pub cooldown_ms: u64,
    /// Wait before a worker retries when no key is free.
    pub no_key_backoff_ms: u64,
    /// Delay between the last worker exiting and the run being declared done.
    pub settle_delay_ms: u64,
    /// Delay before each worker's first dequeue.
    pub worker_stagger_ms: u64,
    /// Cadence of snapshot publication to observers while a run is active.
    pub publish_interval_ms: u64,
    /// Maximum length (in characters) of the error kept on a failed job.
    pub max_error_len: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker_count: MAX_WORKERS,
            cooldown_ms: 45_000,
            no_key_backoff_ms: 2_000,
            settle_delay_ms: 1_000,
            worker_stagger_ms: 200,
            publish_interval_ms: 500,
            max_error_len: 100,
        }
    }
}

impl RunConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    pub fn with_cooldown_ms(mut self, ms: u64) -> Self {
        self.cooldown_ms = ms;
        self
    }

    pub fn with_no_key_backoff_ms(mut self, ms: u64) -> Self {
        self.no_key_backoff_ms = ms;
        self
    }

    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    pub fn with_worker_stagger_ms(mut self, ms: u64) -> Self {
        self.worker_stagger_ms = ms;
        self
    }

    pub fn with_publish_interval_ms(mut self, ms: u64) -> Self {
        self.publish_interval_ms = ms;
        self
    }

    pub fn with_max_error_len(mut self, chars: usize) -> Self {
        self.max_error_len = chars;
        self
    }

    /// Number of workers a run actually spawns for `key_count` keys.
    ///
    /// Never more workers than keys, never more than the configured count,
    /// never fewer than one.
    pub fn effective_concurrency(&self, key_count: usize) -> usize {
        let requested = self.worker_count.clamp(1, MAX_WORKERS);
        requested.min(key_count).max(1)
    }

    /// Worker count to offer by default once the key list is known.
    pub fn suggested_worker_count(key_count: usize) -> usize {
        if key_count == 0 {
            MAX_WORKERS
        } else {
            key_count.min(MAX_WORKERS)
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn no_key_backoff(&self) -> Duration {
        Duration::from_millis(self.no_key_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn worker_stagger(&self) -> Duration {
        Duration::from_millis(self.worker_stagger_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}
