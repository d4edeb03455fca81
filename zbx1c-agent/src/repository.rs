//! Cluster / session / job repository
//!
//! Owns the record caches and issues every rac invocation. Public
//! operations never fail: problems are logged and turn into empty lists or
//! degraded snapshots. Concurrent requests for the same `(cluster, kind)`
//! share one in-flight invocation.

use crate::activity::{filter_active_background_jobs, filter_active_sessions, ActivityPolicies};
use crate::cache::{CacheKey, CacheStore, EntryState, RecordKind};
use crate::decode::{decode, decode_labelled};
use crate::discovery::probe_endpoint;
use crate::error::{FetchError, InvocationError};
use crate::execution::{masked, RacEndpoint, RacQuery, RacRunner};
use crate::metrics::{
    aggregate, summarize_infobases, summarize_sessions, ActivityCounts, ClusterMetricsSnapshot,
    InfobaseReport, SessionSummary,
};
use crate::parser::{parse, RawRecord};
use crate::records::{ClusterRecord, ClusterStatus, InfobaseRecord, JobRecord, SessionRecord};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type FetchResult = Result<Arc<Vec<RawRecord>>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;
type InFlightTable = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Where background jobs are read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobsSource {
    /// `connection list`, keeping background-job applications. Works on
    /// every platform release.
    #[default]
    Connections,
    /// `job list`, platform 8.3.24 and later
    JobList,
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub endpoint: RacEndpoint,
    pub policies: ActivityPolicies,
    pub jobs_source: JobsSource,
    pub probe_timeout: Duration,
}

impl RepositoryOptions {
    pub fn new(endpoint: RacEndpoint) -> Self {
        Self {
            endpoint,
            policies: ActivityPolicies::default(),
            jobs_source: JobsSource::default(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything known about one cluster, gathered in one call
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOverview {
    pub cluster: Option<ClusterRecord>,
    pub infobases: Vec<InfobaseRecord>,
    pub sessions: Vec<SessionRecord>,
    pub jobs: Vec<JobRecord>,
    pub statistics: ActivityCounts,
    pub taken_at: DateTime<Utc>,
}

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

pub struct ClusterRepository<R: RacRunner> {
    runner: Arc<R>,
    options: RepositoryOptions,
    clusters: CacheStore<ClusterRecord>,
    infobases: CacheStore<InfobaseRecord>,
    in_flight: InFlightTable,
    generation: AtomicU64,
}

impl<R: RacRunner> ClusterRepository<R> {
    pub fn new(runner: R, options: RepositoryOptions) -> Self {
        Self::with_shared_runner(Arc::new(runner), options)
    }

    pub fn with_shared_runner(runner: Arc<R>, options: RepositoryOptions) -> Self {
        Self {
            runner,
            options,
            clusters: CacheStore::new(),
            infobases: CacheStore::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn endpoint(&self) -> &RacEndpoint {
        &self.options.endpoint
    }

    pub fn policies(&self) -> &ActivityPolicies {
        &self.options.policies
    }

    // ---- clusters ----

    /// Cluster list of the configured endpoint. Fresh results replace the
    /// cached list; failures and empty output leave it untouched.
    pub async fn discover_clusters(&self, use_cache: bool) -> Vec<ClusterRecord> {
        let key = CacheKey::endpoint(RecordKind::Clusters);
        if use_cache {
            if let Some(entry) = self.clusters.get(&key) {
                debug!("Using {} cached clusters from {}", entry.records.len(), entry.fetched_at);
                return entry.records.to_vec();
            }
        }

        let raw = match self.fetch(RacQuery::ClusterList).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Cluster discovery on {} failed: {}", self.endpoint().address(), e);
                return Vec::new();
            }
        };

        let endpoint = self.endpoint();
        let clusters: Vec<ClusterRecord> = raw
            .iter()
            .filter_map(|r| ClusterRecord::from_raw(r, &endpoint.host, endpoint.port))
            .collect();

        if clusters.is_empty() {
            warn!("rac reported no clusters on {}", endpoint.address());
            return clusters;
        }

        info!("Discovered {} clusters on {}", clusters.len(), endpoint.address());
        self.clusters.publish(key, clusters.clone());
        clusters
    }

    /// Discovery followed by a reachability probe of every cluster.
    pub async fn discover_clusters_with_status(&self, use_cache: bool) -> Vec<ClusterRecord> {
        let clusters = self.discover_clusters(use_cache).await;
        if clusters.is_empty() {
            return clusters;
        }

        let timeout = self.options.probe_timeout;
        let probed: Vec<ClusterRecord> = join_all(clusters.into_iter().map(|cluster| async move {
            let status = probe_endpoint(&cluster.host, cluster.port, timeout).await;
            cluster.with_status(status)
        }))
        .await;

        self.clusters
            .publish(CacheKey::endpoint(RecordKind::Clusters), probed.clone());
        probed
    }

    /// Probe one cluster and store the result in the cached list.
    pub async fn refresh_cluster_status(&self, cluster_id: &str) -> ClusterStatus {
        let Some(cluster) = self.find_cluster(cluster_id).await else {
            warn!("Cluster {} not found on {}", cluster_id, self.endpoint().address());
            return ClusterStatus::Unknown;
        };

        let status = probe_endpoint(&cluster.host, cluster.port, self.options.probe_timeout).await;
        self.record_status(cluster_id, status);
        status
    }

    pub async fn find_cluster(&self, cluster_id: &str) -> Option<ClusterRecord> {
        self.discover_clusters(true)
            .await
            .into_iter()
            .find(|c| c.id == cluster_id)
    }

    fn record_status(&self, cluster_id: &str, status: ClusterStatus) {
        let key = CacheKey::endpoint(RecordKind::Clusters);
        let Some(entry) = self.clusters.get(&key) else {
            return;
        };
        let updated: Vec<ClusterRecord> = entry
            .records
            .iter()
            .map(|c| {
                if c.id == cluster_id {
                    c.clone().with_status(status)
                } else {
                    c.clone()
                }
            })
            .collect();
        self.clusters.publish(key, updated);
    }

    // ---- per-cluster records ----

    pub async fn get_infobases(&self, cluster_id: &str, use_cache: bool) -> Vec<InfobaseRecord> {
        let key = CacheKey::cluster(cluster_id, RecordKind::Infobases);
        if use_cache {
            if let Some(entry) = self.infobases.get(&key) {
                return entry.records.to_vec();
            }
        }

        let query = RacQuery::InfobaseSummaryList {
            cluster: cluster_id.to_string(),
        };
        match self.fetch(query).await {
            Ok(raw) => {
                let infobases: Vec<InfobaseRecord> =
                    raw.iter().cloned().map(InfobaseRecord::new).collect();
                self.infobases.publish(key, infobases.clone());
                infobases
            }
            Err(e) => {
                error!("Failed to list infobases of cluster {}: {}", cluster_id, e);
                Vec::new()
            }
        }
    }

    /// Always fresh; sessions change too fast to cache.
    pub async fn get_sessions(&self, cluster_id: &str) -> Vec<SessionRecord> {
        self.fetch_sessions(cluster_id).await.unwrap_or_else(|e| {
            error!("Failed to list sessions of cluster {}: {}", cluster_id, e);
            Vec::new()
        })
    }

    pub async fn get_jobs(&self, cluster_id: &str) -> Vec<JobRecord> {
        self.fetch_jobs(cluster_id).await.unwrap_or_else(|e| {
            error!("Failed to list background jobs of cluster {}: {}", cluster_id, e);
            Vec::new()
        })
    }

    pub async fn get_active_sessions(&self, cluster_id: &str) -> Vec<SessionRecord> {
        let sessions = self.get_sessions(cluster_id).await;
        filter_active_sessions(&sessions, &self.options.policies.session, local_now())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_active_jobs(&self, cluster_id: &str) -> Vec<JobRecord> {
        let jobs = self.get_jobs(cluster_id).await;
        filter_active_background_jobs(&jobs, &self.options.policies.job, local_now())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_sessions_summary(&self, cluster_id: &str) -> SessionSummary {
        let sessions = self.get_sessions(cluster_id).await;
        summarize_sessions(cluster_id, &sessions, &self.options.policies.session, local_now())
    }

    /// Sessions grouped under the (cached) infobase list of a cluster
    pub async fn get_infobase_summary(&self, cluster_id: &str) -> InfobaseReport {
        let (infobases, sessions) = tokio::join!(
            self.get_infobases(cluster_id, true),
            self.get_sessions(cluster_id)
        );
        summarize_infobases(
            cluster_id,
            &infobases,
            &sessions,
            &self.options.policies.session,
            local_now(),
        )
    }

    async fn fetch_sessions(&self, cluster_id: &str) -> Result<Vec<SessionRecord>, FetchError> {
        let query = RacQuery::SessionList {
            cluster: cluster_id.to_string(),
        };
        let raw = self.fetch(query).await?;
        Ok(raw.iter().cloned().map(SessionRecord::new).collect())
    }

    async fn fetch_jobs(&self, cluster_id: &str) -> Result<Vec<JobRecord>, FetchError> {
        let cluster = cluster_id.to_string();
        match self.options.jobs_source {
            JobsSource::JobList => {
                let raw = self.fetch(RacQuery::JobList { cluster }).await?;
                Ok(raw.iter().cloned().map(JobRecord::new).collect())
            }
            JobsSource::Connections => {
                let raw = self.fetch(RacQuery::ConnectionList { cluster }).await?;
                Ok(raw
                    .iter()
                    .cloned()
                    .map(JobRecord::new)
                    .filter(JobRecord::is_background)
                    .collect())
            }
        }
    }

    // ---- metrics ----

    /// Fresh metrics for one cluster. A failed fetch counts as zero and
    /// marks the snapshot degraded.
    pub async fn get_cluster_metrics(&self, cluster_id: &str) -> ClusterMetricsSnapshot {
        let cluster = self.find_cluster(cluster_id).await;
        let (sessions, jobs) = tokio::join!(
            self.fetch_sessions(cluster_id),
            self.fetch_jobs(cluster_id)
        );

        let mut degraded = false;
        let sessions = sessions.unwrap_or_else(|e| {
            warn!("Sessions of cluster {} unavailable, counting as zero: {}", cluster_id, e);
            degraded = true;
            Vec::new()
        });
        let jobs = jobs.unwrap_or_else(|e| {
            warn!("Jobs of cluster {} unavailable, counting as zero: {}", cluster_id, e);
            degraded = true;
            Vec::new()
        });

        let status = match &cluster {
            Some(c) => {
                let status = probe_endpoint(&c.host, c.port, self.options.probe_timeout).await;
                self.record_status(cluster_id, status);
                status
            }
            None => ClusterStatus::Unknown,
        };

        let counts = aggregate(&sessions, &jobs, &self.options.policies, local_now());
        debug!(
            "Cluster {}: {} sessions ({} active), {} jobs ({} active)",
            cluster_id,
            counts.total_sessions,
            counts.active_sessions,
            counts.total_jobs,
            counts.active_jobs
        );

        ClusterMetricsSnapshot::new(cluster_id, counts, status)
            .with_name(cluster.map(|c| c.name))
            .degraded(degraded)
    }

    /// Metrics for every discovered cluster, in discovery order.
    pub async fn get_all_metrics(&self) -> Vec<ClusterMetricsSnapshot> {
        let clusters = self.discover_clusters(true).await;
        join_all(clusters.iter().map(|c| self.get_cluster_metrics(&c.id))).await
    }

    pub async fn cluster_overview(&self, cluster_id: &str) -> ClusterOverview {
        let (cluster, infobases, sessions, jobs) = tokio::join!(
            self.find_cluster(cluster_id),
            self.get_infobases(cluster_id, true),
            self.get_sessions(cluster_id),
            self.get_jobs(cluster_id),
        );
        let statistics = aggregate(&sessions, &jobs, &self.options.policies, local_now());

        ClusterOverview {
            cluster,
            infobases,
            sessions,
            jobs,
            statistics,
            taken_at: Utc::now(),
        }
    }

    // ---- cache control ----

    pub fn invalidate_clusters(&self) {
        self.clusters.invalidate(&CacheKey::endpoint(RecordKind::Clusters));
    }

    pub fn invalidate_cluster(&self, cluster_id: &str) {
        let dropped = self.infobases.invalidate_cluster(cluster_id);
        debug!("Invalidated {} cache entries of cluster {}", dropped, cluster_id);
    }

    pub fn clear_cache(&self) {
        self.clusters.clear();
        self.infobases.clear();
        info!("Record cache cleared");
    }

    pub fn entry_state(&self, kind: RecordKind, cluster_id: Option<&str>) -> EntryState {
        let key = CacheKey {
            cluster: cluster_id.map(str::to_string),
            kind,
        };
        if self.in_flight.lock().contains_key(&key) {
            return EntryState::Fetching;
        }

        let cached = match kind {
            RecordKind::Clusters => self
                .clusters
                .get(&key)
                .map(|e| (e.records.len(), e.fetched_at)),
            RecordKind::Infobases => self
                .infobases
                .get(&key)
                .map(|e| (e.records.len(), e.fetched_at)),
            RecordKind::Sessions | RecordKind::Jobs => None,
        };
        match cached {
            Some((records, fetched_at)) => EntryState::Cached { records, fetched_at },
            None => EntryState::Absent,
        }
    }

    /// Clusters currently held in the cache
    pub fn cached_clusters(&self) -> Vec<ClusterRecord> {
        self.clusters
            .get(&CacheKey::endpoint(RecordKind::Clusters))
            .map(|e| e.records.to_vec())
            .unwrap_or_default()
    }

    // ---- invocation ----

    /// Run `query`, joining an identical invocation already in flight.
    ///
    /// The invocation runs on its own task and clears its table entry when
    /// it ends, whether or not anyone is still waiting for it.
    async fn fetch(&self, query: RacQuery) -> FetchResult {
        let key = CacheKey {
            cluster: query.cluster().map(str::to_string),
            kind: query.kind(),
        };

        let fetch = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(
                        "Joining in-flight {} fetch for {:?}",
                        key.kind.as_str(),
                        key.cluster
                    );
                    existing.fetch.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let evict = EvictOnDrop {
                        table: Arc::clone(&self.in_flight),
                        key: key.clone(),
                        generation,
                    };
                    let runner = Arc::clone(&self.runner);
                    let args = query.build_args(&self.options.endpoint);
                    let task = tokio::spawn(async move {
                        let _evict = evict;
                        run_and_parse(runner.as_ref(), args).await
                    });
                    let fetch = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(FetchError::Invocation(InvocationError::Spawn(format!(
                                "fetch task ended abnormally: {e}"
                            ))))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        key,
                        InFlight {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };

        fetch.await
    }
}

/// Removes one in-flight entry when its fetch task finishes or is dropped.
/// A newer generation under the same key is left alone.
struct EvictOnDrop {
    table: InFlightTable,
    key: CacheKey,
    generation: u64,
}

impl Drop for EvictOnDrop {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if table
            .get(&self.key)
            .is_some_and(|f| f.generation == self.generation)
        {
            table.remove(&self.key);
        }
    }
}

async fn run_and_parse<R: RacRunner>(runner: &R, args: Vec<String>) -> FetchResult {
    let shown = masked(&args);
    let output = runner.run(args).await?;

    if !output.success() {
        let message = decode(&output.stderr).trim().to_string();
        warn!("rac {} exited with {}: {}", shown, output.exit_code, message);
        return Err(FetchError::Tool {
            code: output.exit_code,
            message,
        });
    }

    let (text, encoding) = decode_labelled(&output.stdout);
    let records = parse(&text);
    debug!(
        "rac {}: {} records ({} bytes, {}, {}ms)",
        shown,
        records.len(),
        output.stdout.len(),
        encoding,
        output.elapsed.as_millis()
    );
    Ok(Arc::new(records))
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
