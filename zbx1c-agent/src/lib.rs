//! zbx1c agent - 1C:Enterprise cluster monitoring for Zabbix
//!
//! Turns the text output of the 1C cluster administration utility (`rac`)
//! into structured, cached, per-cluster metrics:
//! - Byte decoding across the code pages rac prints in
//! - `key : value` block parsing into ordered records
//! - Session and background-job activity classification
//! - Cached, de-duplicated rac invocations per cluster
//! - Metric snapshots, Zabbix LLD documents and trapper delivery

pub mod activity;
pub mod cache;
pub mod config;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod records;
pub mod repository;
pub mod trapper;

pub use activity::{ActivityPolicies, JobPolicy, SessionPolicy};
pub use config::AgentConfig;
pub use error::{ConfigError, FetchError, InvocationError};
pub use execution::{ProcessRunner, RacEndpoint, RacOutput, RacRunner};
pub use metrics::{ActivityCounts, ClusterMetricsSnapshot};
pub use parser::RawRecord;
pub use records::{ClusterRecord, ClusterStatus, InfobaseRecord, JobRecord, SessionRecord};
pub use repository::{ClusterRepository, JobsSource, RepositoryOptions};
