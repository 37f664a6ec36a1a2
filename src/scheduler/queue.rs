use std::collections::VecDeque;

use crate::scheduler::job::JobId;

/// Ids of jobs waiting for a worker, in processing order.
#[derive(Debug, Default)]
pub struct JobQueue {
    ids: VecDeque<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Used for seeding and for transient-failure requeue.
    pub fn enqueue(&mut self, id: JobId) {
        self.ids.push_back(id);
    }

    pub fn dequeue_head(&mut self) -> Option<JobId> {
        self.ids.pop_front()
    }

    /// Put a job back in front, keeping its place when no key was free.
    pub fn requeue_head(&mut self, id: JobId) {
        self.ids.push_front(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl FromIterator<JobId> for JobQueue {
    fn from_iter<I: IntoIterator<Item = JobId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
