use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub clusters_cached: u32,
    pub snapshots_tracked: u32,
    pub memory_usage_mb: f32,
    pub poll_cycles: u64,
    /// RFC3339 time of the last finished snapshot cycle
    pub last_poll: Option<String>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    poll_cycles: Arc<AtomicU64>,
    last_poll: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            poll_cycles: Arc::new(AtomicU64::new(0)),
            last_poll: Arc::new(Mutex::new(None)),
        }
    }

    pub fn record_poll(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_poll.lock() = Some(OffsetDateTime::now_utc());
    }

    pub fn get_health(&self, clusters_cached: usize, snapshots_tracked: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            clusters_cached: clusters_cached as u32,
            snapshots_tracked: snapshots_tracked as u32,
            memory_usage_mb: get_memory_usage_mb(),
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            last_poll: self.last_poll.lock().and_then(|t| t.format(&Rfc3339).ok()),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polls_are_counted() {
        let tracker = HealthTracker::new();
        assert!(tracker.get_health(0, 0).last_poll.is_none());

        tracker.record_poll();
        tracker.record_poll();
        let health = tracker.get_health(3, 2);
        assert_eq!(health.poll_cycles, 2);
        assert_eq!(health.clusters_cached, 3);
        assert_eq!(health.snapshots_tracked, 2);
        assert!(health.last_poll.is_some());
    }
}
