use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::credentials::Credential;
use crate::scheduler::job::{Generated, GenerationMode, Job, JobPayload, LocalizedText, Metadata};
use crate::worker::generator::{GenerateError, Generator};

/// Stand-in provider for dry runs: sleeps for a jittered latency and fails
/// on a fixed call pattern.
#[derive(Debug, Default)]
pub struct SimulatedGenerator {
    latency: Duration,
    jitter: Duration,
    rate_limit_every: Option<usize>,
    fail_every: Option<usize>,
    calls: AtomicUsize,
}

impl SimulatedGenerator {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Every `n`th call answers with HTTP 429.
    pub fn rate_limit_every(mut self, n: usize) -> Self {
        self.rate_limit_every = (n > 0).then_some(n);
        self
    }

    /// Every `n`th call fails with a non-retryable error.
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.latency + Duration::from_millis(extra)
    }
}

#[async_trait]
impl Generator for SimulatedGenerator {
    async fn generate(
        &self,
        job: &Job,
        credential: &Credential,
        mode: GenerationMode,
    ) -> Result<Generated, GenerateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay()).await;

        if self.rate_limit_every.is_some_and(|n| call % n == 0) {
            return Err(GenerateError::http(429, "Resource has been exhausted (quota)"));
        }
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(GenerateError::http(400, "Invalid request: unsupported input"));
        }

        let subject = match &job.payload {
            JobPayload::File { path, .. } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| job.label.clone()),
            JobPayload::Text { title, .. } => title.clone(),
        };

        tracing::trace!(job_id = %job.id, key = %credential, mode = %mode, "Simulated call");

        Ok(Generated {
            metadata: Metadata {
                en: LocalizedText {
                    title: format!("{subject} ({mode})"),
                    keywords: format!("{subject}, stock, {mode}"),
                },
                ind: LocalizedText {
                    title: format!("{subject} ({mode})"),
                    keywords: format!("{subject}, stok, {mode}"),
                },
                category: "12".to_string(),
            },
            thumbnail: None,
        })
    }
}
