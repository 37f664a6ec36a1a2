//! Worker side of a run.
//!
//! - [`Generator`]: the provider capability, one job with one key
//! - [`classify`](classify::classify): decides whether a provider error is
//!   retried on another key, fails the job, or drops it
//! - [`Worker`]: the loop each concurrent worker runs
//! - [`SimulatedGenerator`]: latency and failure injection for dry runs
//!
//! # Worker loop
//!
//! 1. Stop if the run was cancelled
//! 2. Pop the head of the queue; exit when it is empty
//! 3. Lease a key round-robin; if none is free, put the job back in front
//!    and back off
//! 4. Mark the job processing and call the generator
//! 5. Success completes the job; transient errors requeue it at the tail and
//!    cool the key; other errors fail the job

pub mod classify;
pub mod executor;
pub mod generator;
pub mod simulated;

pub use classify::{classify, FailureKind};
pub use executor::Worker;
pub use generator::{GenerateError, Generator};
pub use simulated::SimulatedGenerator;
