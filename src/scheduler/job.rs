use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a batch produces. Passed through to the generator untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Metadata,
    Idea,
    Prompt,
}

impl GenerationMode {
    /// Idea and prompt batches are saved once a run drains.
    pub fn keeps_history(&self) -> bool {
        matches!(self, GenerationMode::Idea | GenerationMode::Prompt)
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Metadata => write!(f, "metadata"),
            GenerationMode::Idea => write!(f, "idea"),
            GenerationMode::Prompt => write!(f, "prompt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Image,
    Video,
    Vector,
}

/// Input for one generation call. The scheduler never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobPayload {
    /// A media file to describe.
    File { path: PathBuf, kind: FileKind },
    /// A textual seed (idea topic, prompt niche, source row).
    Text { title: String, keywords: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub title: String,
    pub keywords: String,
}

/// Generated stock metadata, in English and Indonesian.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub en: LocalizedText,
    pub ind: LocalizedText,
    pub category: String,
}

/// Successful generator output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generated {
    pub metadata: Metadata,
    /// Lightweight preview produced alongside the metadata (e.g. a video frame).
    pub thumbnail: Option<String>,
}

/// One unit of work.
///
/// `result` is only set while `Completed` and `error` only while `Failed`;
/// the transition methods below are the only way those fields change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub label: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub result: Option<Metadata>,
    pub thumbnail: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(label: impl Into<String>, payload: JobPayload) -> Self {
        Self::with_id(Uuid::new_v4(), label, payload)
    }

    pub fn with_id(id: JobId, label: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id,
            label: label.into(),
            payload,
            status: JobStatus::Pending,
            result: None,
            thumbnail: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Text-seeded job, as used for idea and prompt slots.
    pub fn text(label: impl Into<String>, title: impl Into<String>, keywords: impl Into<String>) -> Self {
        Self::new(
            label,
            JobPayload::Text {
                title: title.into(),
                keywords: keywords.into(),
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.error = None;
        self.result = None;
        self.completed_at = None;
    }

    pub(crate) fn complete(&mut self, generated: Generated) {
        self.status = JobStatus::Completed;
        self.result = Some(generated.metadata);
        self.thumbnail = generated.thumbnail.or(self.thumbnail.take());
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Back to `Pending`, dropping any result or error.
    pub(crate) fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.result = None;
        self.error = None;
        self.completed_at = None;
    }
}
