//! Cluster discovery helpers for Zabbix
//!
//! Provides:
//! - TCP reachability probes for clusters and the RAS service
//! - Low-level discovery (LLD) documents for cluster prototypes

use crate::records::{ClusterRecord, ClusterStatus};
use serde::Serialize;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Probe `host:port` with a plain TCP connect.
///
/// Refused connections mean the service is down; anything else we cannot
/// interpret (timeouts, DNS, unreachable networks) stays unknown.
pub async fn probe_endpoint(host: &str, port: u16, timeout: Duration) -> ClusterStatus {
    let addr = format!("{host}:{port}");
    let status = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => ClusterStatus::Available,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ClusterStatus::Unavailable,
        Ok(Err(e)) => {
            debug!("Probe of {} failed: {}", addr, e);
            ClusterStatus::Unknown
        }
        Err(_) => {
            debug!("Probe of {} timed out after {:?}", addr, timeout);
            ClusterStatus::Unknown
        }
    };
    debug!("Probe {} -> {}", addr, status);
    status
}

/// One discovered cluster, keyed by Zabbix LLD macros
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LldEntry {
    #[serde(rename = "{#CLUSTER.ID}")]
    pub id: String,
    #[serde(rename = "{#CLUSTER.NAME}")]
    pub name: String,
    #[serde(rename = "{#CLUSTER.HOST}")]
    pub host: String,
    #[serde(rename = "{#CLUSTER.PORT}")]
    pub port: u16,
    #[serde(rename = "{#CLUSTER.STATUS}")]
    pub status: ClusterStatus,
}

impl From<&ClusterRecord> for LldEntry {
    fn from(cluster: &ClusterRecord) -> Self {
        Self {
            id: cluster.id.clone(),
            name: cluster.name.clone(),
            host: cluster.host.clone(),
            port: cluster.port,
            status: cluster.status,
        }
    }
}

/// `{"data": [...]}` document consumed by Zabbix discovery rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LldDocument {
    pub data: Vec<LldEntry>,
}

impl LldDocument {
    pub fn from_clusters(clusters: &[ClusterRecord]) -> Self {
        Self {
            data: clusters.iter().map(LldEntry::from).collect(),
        }
    }
}

/// Result of the `check-ras` probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RasStatus {
    pub host: String,
    pub port: u16,
    pub available: bool,
    pub status: ClusterStatus,
    pub rac_path: String,
}

pub async fn check_ras(host: &str, port: u16, rac_path: &str, timeout: Duration) -> RasStatus {
    let status = probe_endpoint(host, port, timeout).await;
    RasStatus {
        host: host.to_string(),
        port,
        available: status == ClusterStatus::Available,
        status,
        rac_path: rac_path.to_string(),
    }
}
