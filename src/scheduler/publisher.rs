use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::scheduler::store::JobStore;

/// Periodically pushes store snapshots to subscribers while a run is active,
/// so a slow observer never sees every individual mutation.
pub struct SnapshotPublisher {
    interval: Duration,
}

impl SnapshotPublisher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Publish on every tick until `stop` is cancelled, then once more so
    /// subscribers end on the final state.
    pub async fn run(&self, store: JobStore, stop: CancellationToken) {
        // tokio rejects a zero period
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    store.publish().await;
                }
            }
        }

        store.publish().await;
    }
}
