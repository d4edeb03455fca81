//! Cluster metrics aggregation
//!
//! Reduces session and job records into the counters Zabbix polls:
//! - Total / active sessions
//! - Total / active background jobs
//! - Cluster status and a degraded flag for partial data
//! - Per-user and per-application session breakdown
//! - Per-infobase session activity

use crate::activity::{is_background_job_active, is_session_active, ActivityPolicies, SessionPolicy};
use crate::records::{ClusterStatus, InfobaseRecord, JobRecord, SessionRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Activity counters for one cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityCounts {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_jobs: usize,
    pub active_jobs: usize,
}

/// Count sessions and jobs. Input order does not matter.
pub fn aggregate(
    sessions: &[SessionRecord],
    jobs: &[JobRecord],
    policies: &ActivityPolicies,
    now: NaiveDateTime,
) -> ActivityCounts {
    ActivityCounts {
        total_sessions: sessions.len(),
        active_sessions: sessions
            .iter()
            .filter(|s| is_session_active(s, &policies.session, now))
            .count(),
        total_jobs: jobs.len(),
        active_jobs: jobs
            .iter()
            .filter(|j| is_background_job_active(j, &policies.job, now))
            .count(),
    }
}

/// Point-in-time metrics for one cluster (recomputed on every call)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMetricsSnapshot {
    pub cluster_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(flatten)]
    pub counts: ActivityCounts,
    pub status: ClusterStatus,
    /// Set when sessions or jobs could not be fetched and count as zero
    pub degraded: bool,
    pub taken_at: DateTime<Utc>,
}

impl ClusterMetricsSnapshot {
    pub fn new(
        cluster_id: impl Into<String>,
        counts: ActivityCounts,
        status: ClusterStatus,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cluster_name: None,
            counts,
            status,
            degraded: false,
            taken_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.cluster_name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// `(metric, value)` pairs in the form pushed to Zabbix
    pub fn metric_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("total_sessions", self.counts.total_sessions.to_string()),
            ("active_sessions", self.counts.active_sessions.to_string()),
            ("total_jobs", self.counts.total_jobs.to_string()),
            ("active_jobs", self.counts.active_jobs.to_string()),
            ("status", self.status.as_metric().to_string()),
        ]
    }
}

/// Session breakdown for the `sessions-summary` report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub cluster_id: String,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub hibernated_sessions: usize,
    pub unique_users: usize,
    pub users: BTreeMap<String, usize>,
    pub applications: BTreeMap<String, usize>,
    pub taken_at: DateTime<Utc>,
}

const UNKNOWN: &str = "unknown";

pub fn summarize_sessions(
    cluster_id: &str,
    sessions: &[SessionRecord],
    policy: &SessionPolicy,
    now: NaiveDateTime,
) -> SessionSummary {
    let mut users: BTreeMap<String, usize> = BTreeMap::new();
    let mut applications: BTreeMap<String, usize> = BTreeMap::new();

    for session in sessions {
        *users.entry(session.user_name().unwrap_or(UNKNOWN).to_string()).or_default() += 1;
        *applications.entry(session.app_id().unwrap_or(UNKNOWN).to_string()).or_default() += 1;
    }

    SessionSummary {
        cluster_id: cluster_id.to_string(),
        total_sessions: sessions.len(),
        active_sessions: sessions.iter().filter(|s| is_session_active(s, policy, now)).count(),
        hibernated_sessions: sessions.iter().filter(|s| s.is_hibernated()).count(),
        unique_users: users.len(),
        users,
        applications,
        taken_at: Utc::now(),
    }
}

/// Session activity of one infobase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfobaseSummary {
    pub infobase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub has_active_sessions: bool,
    pub unique_users: usize,
    pub applications: BTreeMap<String, usize>,
    /// Latest `last-active-at` (or `started-at`) over the infobase's sessions
    pub last_activity: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfobaseReport {
    pub cluster_id: String,
    pub infobases: Vec<InfobaseSummary>,
    /// Sessions naming an infobase that is not in the list
    pub unattributed_sessions: usize,
    pub taken_at: DateTime<Utc>,
}

/// Group sessions under the listed infobases, in list order. Sessions are
/// matched on the infobase id.
pub fn summarize_infobases(
    cluster_id: &str,
    infobases: &[InfobaseRecord],
    sessions: &[SessionRecord],
    policy: &SessionPolicy,
    now: NaiveDateTime,
) -> InfobaseReport {
    let mut by_infobase: BTreeMap<&str, Vec<&SessionRecord>> = BTreeMap::new();
    for session in sessions {
        by_infobase.entry(session.infobase().unwrap_or("")).or_default().push(session);
    }

    let mut attributed = 0;
    let summaries = infobases
        .iter()
        .filter_map(|ib| {
            let id = ib.id()?;
            let own = by_infobase.get(id).map(Vec::as_slice).unwrap_or_default();
            attributed += own.len();
            Some(summarize_infobase(ib, id, own, policy, now))
        })
        .collect();

    InfobaseReport {
        cluster_id: cluster_id.to_string(),
        infobases: summaries,
        unattributed_sessions: sessions.len() - attributed,
        taken_at: Utc::now(),
    }
}

fn summarize_infobase(
    infobase: &InfobaseRecord,
    id: &str,
    sessions: &[&SessionRecord],
    policy: &SessionPolicy,
    now: NaiveDateTime,
) -> InfobaseSummary {
    let mut users = BTreeSet::new();
    let mut applications: BTreeMap<String, usize> = BTreeMap::new();
    for session in sessions {
        users.insert(session.user_name().unwrap_or(UNKNOWN));
        *applications.entry(session.app_id().unwrap_or(UNKNOWN).to_string()).or_default() += 1;
    }
    let active_sessions = sessions.iter().filter(|s| is_session_active(s, policy, now)).count();

    InfobaseSummary {
        infobase: id.to_string(),
        name: infobase.name().map(str::to_string),
        description: infobase.description().map(str::to_string),
        total_sessions: sessions.len(),
        active_sessions,
        has_active_sessions: active_sessions > 0,
        unique_users: users.len(),
        applications,
        last_activity: sessions
            .iter()
            .filter_map(|s| s.last_active_at().or_else(|| s.started_at()))
            .max(),
    }
}
