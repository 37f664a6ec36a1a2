pub mod controller;
pub mod job;
pub mod publisher;
pub mod queue;
pub mod run;
pub mod store;

pub use controller::{RunHandle, Scheduler};
pub use job::{GenerationMode, Job, JobId, JobPayload, JobStatus};
pub use queue::JobQueue;
pub use run::{RunEvent, RunPhase, RunReport};
pub use store::{JobStore, Snapshot, StatusCounts};
