//! Background metric polling
//!
//! Every cycle builds a fresh map of snapshots and swaps it in whole, so
//! readers never observe a half-updated set.

use crate::health::HealthTracker;
use crate::state::{Shared, SnapshotMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zbx1c_agent::{ClusterRepository, RacRunner};

pub async fn poll_once<R: RacRunner>(
    repo: &ClusterRepository<R>,
    snapshots: &Shared<SnapshotMap>,
    health: &HealthTracker,
) -> usize {
    repo.invalidate_clusters();
    let fresh: SnapshotMap = repo
        .get_all_metrics()
        .await
        .into_iter()
        .map(|snapshot| (snapshot.cluster_id.clone(), snapshot))
        .collect();
    let count = fresh.len();
    *snapshots.lock() = fresh;
    health.record_poll();
    debug!(clusters = count, "snapshot cycle finished");
    count
}

pub fn spawn_snapshot_poller<R: RacRunner>(
    repo: Arc<ClusterRepository<R>>,
    snapshots: Shared<SnapshotMap>,
    health: HealthTracker,
    every: Duration,
) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "snapshot poller started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            poll_once(repo.as_ref(), &snapshots, &health).await;
        }
    })
}
