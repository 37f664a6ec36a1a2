//! Persistence of finished batches.
//!
//! The scheduler hands the final snapshot of an idea or prompt run to a
//! [`BatchSink`]. [`JsonHistory`] keeps the last batch per mode as a JSON file,
//! which can later be restored into a [`JobStore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::scheduler::job::{GenerationMode, Job, JobStatus};
use crate::scheduler::store::JobStore;

#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn save(&self, mode: GenerationMode, jobs: &[Job]) -> Result<()>;
}

/// Last batch per mode, stored as `last_<mode>_batch.json` in a directory.
#[derive(Debug, Clone)]
pub struct JsonHistory {
    dir: PathBuf,
}

impl JsonHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, mode: GenerationMode) -> PathBuf {
        self.dir.join(format!("last_{mode}_batch.json"))
    }

    /// Saved batch for `mode`, or `None` if nothing was saved yet.
    ///
    /// Jobs that were mid-flight when saved come back as pending.
    pub async fn load(&self, mode: GenerationMode) -> Result<Option<Vec<Job>>> {
        let bytes = match tokio::fs::read(self.path_for(mode)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut jobs: Vec<Job> = serde_json::from_slice(&bytes)?;
        for job in &mut jobs {
            if job.status == JobStatus::Processing {
                job.reset();
            }
        }
        Ok(Some(jobs))
    }

    /// Load the saved batch for `mode` into `store`, replacing its contents.
    /// Returns the number of restored jobs.
    pub async fn restore(&self, mode: GenerationMode, store: &JobStore) -> Result<usize> {
        match self.load(mode).await? {
            Some(jobs) => {
                let count = jobs.len();
                store.replace_all(jobs).await;
                tracing::info!(mode = %mode, count, "Restored batch from history");
                Ok(count)
            }
            None => Ok(0),
        }
    }

    pub async fn has_saved(&self, mode: GenerationMode) -> bool {
        tokio::fs::try_exists(self.path_for(mode))
            .await
            .unwrap_or(false)
    }

    /// Forget the saved batch for `mode`.
    pub async fn clear(&self, mode: GenerationMode) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(mode)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BatchSink for JsonHistory {
    async fn save(&self, mode: GenerationMode, jobs: &[Job]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(mode);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(jobs)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::info!(mode = %mode, count = jobs.len(), path = %path.display(), "Batch saved to history");
        Ok(())
    }
}
