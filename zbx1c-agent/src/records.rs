//! Typed views over parsed rac records
//!
//! Accessors parse on demand: a missing or malformed field reads as `None`,
//! never as an error. Every field rac printed stays reachable through
//! [`SessionRecord::raw`] and friends.

use crate::parser::RawRecord;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::fmt;

/// Connection applications that represent background work
pub const BACKGROUND_APPLICATIONS: [&str; 3] =
    ["BackgroundJob", "SystemBackgroundJob", "JobScheduler"];

/// Cluster reachability as seen by the last probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Available,
    Unavailable,
    Unknown,
}

impl ClusterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Available => "available",
            ClusterStatus::Unavailable => "unavailable",
            ClusterStatus::Unknown => "unknown",
        }
    }

    /// Numeric form used for Zabbix items (1 = up, 0 = down, 2 = unknown)
    pub fn as_metric(self) -> u8 {
        match self {
            ClusterStatus::Available => 1,
            ClusterStatus::Unavailable => 0,
            ClusterStatus::Unknown => 2,
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub status: ClusterStatus,
}

impl ClusterRecord {
    /// Build from a `cluster list` block. Blocks without an id are dropped.
    pub fn from_raw(raw: &RawRecord, default_host: &str, default_port: u16) -> Option<Self> {
        let id = normalize_cluster_id(raw.get_any(&["cluster", "id"])?);
        if id.is_empty() {
            return None;
        }

        let host = raw
            .get("host")
            .map(unquote)
            .filter(|h| !h.is_empty())
            .unwrap_or(default_host);
        let port = raw
            .get("port")
            .and_then(|p| unquote(p).parse().ok())
            .unwrap_or(default_port);

        Some(Self {
            id: id.to_string(),
            name: raw.get("name").map(unquote).unwrap_or_default().to_string(),
            host: host.to_string(),
            port,
            status: ClusterStatus::Unknown,
        })
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = status;
        self
    }
}

/// One `session list` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionRecord(RawRecord);

impl SessionRecord {
    pub fn new(raw: RawRecord) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &RawRecord {
        &self.0
    }

    pub fn session(&self) -> Option<&str> {
        self.text("session")
    }

    pub fn session_id(&self) -> Option<u64> {
        self.number("session-id")
    }

    pub fn infobase(&self) -> Option<&str> {
        self.text("infobase")
    }

    pub fn user_name(&self) -> Option<&str> {
        self.text("user-name")
    }

    pub fn host(&self) -> Option<&str> {
        self.text("host")
    }

    pub fn app_id(&self) -> Option<&str> {
        self.text("app-id")
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.0.get("started-at").and_then(parse_timestamp)
    }

    pub fn last_active_at(&self) -> Option<NaiveDateTime> {
        self.0.get("last-active-at").and_then(parse_timestamp)
    }

    pub fn is_hibernated(&self) -> bool {
        self.text("hibernate")
            .is_some_and(|v| v.eq_ignore_ascii_case("yes"))
    }

    pub fn calls_last_5min(&self) -> Option<u64> {
        self.number("calls-last-5min")
    }

    pub fn bytes_last_5min(&self) -> Option<u64> {
        self.number("bytes-last-5min")
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(unquote).filter(|v| !v.is_empty())
    }

    fn number(&self, key: &str) -> Option<u64> {
        self.text(key).and_then(|v| v.parse().ok())
    }
}

/// A background job, from `job list` or a filtered `connection list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct JobRecord(RawRecord);

impl JobRecord {
    pub fn new(raw: RawRecord) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &RawRecord {
        &self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get_any(&["job", "connection"]).map(unquote)
    }

    pub fn infobase(&self) -> Option<&str> {
        self.0.get("infobase").map(unquote).filter(|v| !v.is_empty())
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.0
            .get_any(&["started-at", "connected-at"])
            .and_then(parse_timestamp)
    }

    /// Explicit run time in milliseconds, when rac reports one
    pub fn duration_ms(&self) -> Option<i64> {
        self.0.get("duration").and_then(|v| unquote(v).parse().ok())
    }

    pub fn state(&self) -> Option<&str> {
        self.0.get_any(&["state", "status"]).map(unquote)
    }

    pub fn application(&self) -> Option<&str> {
        self.0.get_any(&["application", "app-id"]).map(unquote)
    }

    pub fn is_background(&self) -> bool {
        self.application()
            .is_some_and(|app| BACKGROUND_APPLICATIONS.contains(&app))
    }
}

/// One `infobase summary list` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InfobaseRecord(RawRecord);

impl InfobaseRecord {
    pub fn new(raw: RawRecord) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &RawRecord {
        &self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("infobase").map(unquote)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").map(unquote)
    }

    pub fn description(&self) -> Option<&str> {
        self.0.get("descr").map(unquote).filter(|v| !v.is_empty())
    }
}

/// Strip one pair of surrounding double quotes.
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Clean up a cluster id that went through Zabbix macro expansion
/// (`[uuid]`, `"uuid"`, `'uuid'`).
pub fn normalize_cluster_id(raw: &str) -> &str {
    raw.trim().trim_matches(|c| matches!(c, '[' | ']' | '"' | '\''))
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a rac timestamp into local naive time.
///
/// rac prints naive local time (`2024-01-15T10:30:00`). RFC 3339 values are
/// converted to the local zone so both compare against the same clock.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = unquote(value);
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local).naive_local());
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(fields: &[(&str, &str)]) -> RawRecord {
        fields.iter().copied().collect()
    }

    #[test]
    fn cluster_from_block() {
        let block = raw(&[
            ("cluster", "e0c8c1f4-5d4b-4c5e-9e8a-0b1a2c3d4e5f"),
            ("host", "srv-1c"),
            ("port", "1541"),
            ("name", "\"Main cluster\""),
        ]);
        let cluster = ClusterRecord::from_raw(&block, "localhost", 1545).unwrap();
        assert_eq!(cluster.id, "e0c8c1f4-5d4b-4c5e-9e8a-0b1a2c3d4e5f");
        assert_eq!(cluster.name, "Main cluster");
        assert_eq!(cluster.host, "srv-1c");
        assert_eq!(cluster.port, 1541);
        assert_eq!(cluster.status, ClusterStatus::Unknown);
    }

    #[test]
    fn cluster_falls_back_to_id_and_endpoint() {
        let block = raw(&[("id", "abc"), ("port", "not-a-port")]);
        let cluster = ClusterRecord::from_raw(&block, "rac-host", 1545).unwrap();
        assert_eq!(cluster.id, "abc");
        assert_eq!(cluster.host, "rac-host");
        assert_eq!(cluster.port, 1545);
        assert_eq!(cluster.name, "");
    }

    #[test]
    fn cluster_without_id_is_dropped() {
        assert!(ClusterRecord::from_raw(&raw(&[("name", "x")]), "h", 1).is_none());
        assert!(ClusterRecord::from_raw(&raw(&[("cluster", "[]")]), "h", 1).is_none());
    }

    #[test]
    fn cluster_status_serializes_lowercase() {
        let json = serde_json::to_string(&ClusterStatus::Unavailable).unwrap();
        assert_eq!(json, "\"unavailable\"");
        assert_eq!(ClusterStatus::Available.to_string(), "available");
    }

    #[test]
    fn session_accessors() {
        let session = SessionRecord::new(raw(&[
            ("session", "11111111-2222-3333-4444-555555555555"),
            ("session-id", "7"),
            ("user-name", "\"Иванов\""),
            ("app-id", "1CV8C"),
            ("hibernate", "no"),
            ("last-active-at", "2024-01-15T10:30:00"),
            ("calls-last-5min", "12"),
            ("bytes-last-5min", "oops"),
        ]));
        assert_eq!(session.session_id(), Some(7));
        assert_eq!(session.user_name(), Some("Иванов"));
        assert_eq!(session.app_id(), Some("1CV8C"));
        assert!(!session.is_hibernated());
        assert_eq!(session.calls_last_5min(), Some(12));
        assert_eq!(session.bytes_last_5min(), None);
        assert_eq!(
            session.last_active_at(),
            NaiveDate::from_ymd_opt(2024, 1, 15).and_then(|d| d.and_hms_opt(10, 30, 0))
        );
        assert_eq!(session.infobase(), None);
    }

    #[test]
    fn job_accepts_connection_fields() {
        let job = JobRecord::new(raw(&[
            ("connection", "c-1"),
            ("application", "\"BackgroundJob\""),
            ("connected-at", "2024-01-15 09:00:00"),
        ]));
        assert_eq!(job.id(), Some("c-1"));
        assert!(job.is_background());
        assert!(job.started_at().is_some());
        assert_eq!(job.duration_ms(), None);

        let client = JobRecord::new(raw(&[("connection", "c-2"), ("application", "1CV8C")]));
        assert!(!client.is_background());
    }

    #[test]
    fn timestamps() {
        assert!(parse_timestamp("2024-01-15T10:30:00.123").is_some());
        assert!(parse_timestamp("\"2024-01-15 10:30:00\"").is_some());
        assert!(parse_timestamp("2024-01-15T10:30:00+03:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn cluster_ids_are_normalized() {
        assert_eq!(normalize_cluster_id("[\"abc\"]"), "abc");
        assert_eq!(normalize_cluster_id(" 'abc' "), "abc");
        assert_eq!(normalize_cluster_id("abc"), "abc");
    }
}
