use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use zbx1c_agent::ClusterMetricsSnapshot;

pub type Shared<T> = Arc<Mutex<T>>;

/// Latest snapshot per cluster id
pub type SnapshotMap = HashMap<String, ClusterMetricsSnapshot>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
