//! End-to-end pipeline tests against the stub rac runner

use std::time::Duration;
use tokio::net::TcpListener;
use zbx1c_agent::cache::{EntryState, RecordKind};
use zbx1c_agent::discovery::LldDocument;
use zbx1c_agent::{ClusterStatus, InvocationError, JobsSource, RacEndpoint};
use zbx1c_devkit::{minutes_ago, rac_time, RacText, StubRunner, TestHarness};

const CLUSTER: &str = "e0c8c1f4-5d4b-4c5e-9e8a-0b1a2c3d4e5f";
const OTHER: &str = "a1b2c3d4-0000-4000-8000-000000000002";

async fn listening_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn three_sessions_two_active() -> String {
    RacText::new()
        .session("s-1", "alice", false, minutes_ago(1))
        .session("s-2", "bob", false, minutes_ago(2))
        .session("s-3", "carol", true, minutes_ago(1))
        .build()
}

#[tokio::test]
async fn discovery_parses_and_caches_clusters() {
    let text = RacText::new()
        .cluster(CLUSTER, "Main", "srv-1c", 1541)
        .cluster(OTHER, "Reserve", "srv-2c", 1641)
        .build();
    let harness = TestHarness::new(StubRunner::new().with_output("cluster list", text));
    let repo = &harness.repository;

    let clusters = repo.discover_clusters(true).await;
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].id, CLUSTER);
    assert_eq!(clusters[0].name, "Main");
    assert_eq!(clusters[1].port, 1641);
    assert!(clusters.iter().all(|c| c.status == ClusterStatus::Unknown));

    repo.discover_clusters(true).await;
    harness.assert_invocations("cluster list", 1).unwrap();
    assert!(matches!(
        repo.entry_state(RecordKind::Clusters, None),
        EntryState::Cached { records: 2, .. }
    ));

    repo.invalidate_clusters();
    assert_eq!(repo.entry_state(RecordKind::Clusters, None), EntryState::Absent);
    repo.discover_clusters(true).await;
    harness.assert_invocations("cluster list", 2).unwrap();
}

#[tokio::test]
async fn discovery_with_status_probes_each_cluster() {
    let (_listener, port) = listening_port().await;
    let text = RacText::new().cluster(CLUSTER, "Main", "127.0.0.1", port).build();
    let harness = TestHarness::new(StubRunner::new().with_output("cluster list", text));

    let clusters = harness.repository.discover_clusters_with_status(false).await;
    assert_eq!(clusters[0].status, ClusterStatus::Available);

    // The probed status is what later cache readers see
    let cached = harness.repository.discover_clusters(true).await;
    assert_eq!(cached[0].status, ClusterStatus::Available);

    let lld = serde_json::to_value(LldDocument::from_clusters(&clusters)).unwrap();
    assert_eq!(lld["data"][0]["{#CLUSTER.NAME}"], "Main");
    assert_eq!(lld["data"][0]["{#CLUSTER.STATUS}"], "available");
}

#[tokio::test]
async fn empty_or_failed_discovery_is_not_cached() {
    let harness = TestHarness::new(StubRunner::new().with_output("cluster list", "\n\n"));
    assert!(harness.repository.discover_clusters(true).await.is_empty());
    assert_eq!(
        harness.repository.entry_state(RecordKind::Clusters, None),
        EntryState::Absent
    );

    let text = RacText::new().cluster(CLUSTER, "Main", "srv", 1541).build();
    let _ = harness.runner.clone().with_output("cluster list", text);
    assert_eq!(harness.repository.discover_clusters(true).await.len(), 1);

    // A failing refresh leaves the previous list in place
    let _ = harness.runner.clone().with_failure("cluster list", 1, "server unavailable");
    assert!(harness.repository.discover_clusters(false).await.is_empty());
    assert_eq!(harness.repository.discover_clusters(true).await.len(), 1);
}

#[tokio::test]
async fn concurrent_fetches_share_one_invocation() {
    let stub = StubRunner::new()
        .with_output("session list", three_sessions_two_active())
        .with_delay(Duration::from_millis(100));
    let harness = TestHarness::new(stub);
    let repo = &harness.repository;

    let (a, b, c, d) = tokio::join!(
        repo.get_sessions(CLUSTER),
        repo.get_sessions(CLUSTER),
        repo.get_sessions(CLUSTER),
        repo.get_sessions(CLUSTER),
    );
    assert_eq!(a.len(), 3);
    assert_eq!(a, b);
    assert_eq!(c, d);
    harness.assert_invocations("session list", 1).unwrap();

    // Different clusters are independent keys
    let (x, y) = tokio::join!(repo.get_sessions(CLUSTER), repo.get_sessions(OTHER));
    assert_eq!(x.len(), y.len());
    harness.assert_invocations("session list", 3).unwrap();
}

#[tokio::test]
async fn abandoned_fetch_does_not_leak_into_later_calls() {
    let stub = StubRunner::new()
        .with_output("session list", "session : old\n")
        .with_delay(Duration::from_millis(200));
    let harness = TestHarness::new(stub);
    let repo = &harness.repository;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), repo.get_sessions(CLUSTER)).await;
    assert!(abandoned.is_err());

    // The orphaned invocation still finishes and clears its own entry
    let _ = harness.runner.clone().with_output("session list", "session : new\n");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(repo.entry_state(RecordKind::Sessions, Some(CLUSTER)), EntryState::Absent);

    let sessions = repo.get_sessions(CLUSTER).await;
    let ids: Vec<_> = sessions.iter().filter_map(|s| s.session()).collect();
    assert_eq!(ids, vec!["new"]);
    harness.assert_invocations("session list", 2).unwrap();
}

#[tokio::test]
async fn in_flight_fetch_is_observable() {
    let stub = StubRunner::new()
        .with_output(
            "infobase summary list",
            RacText::new().infobase("ib-1", "Accounting").build(),
        )
        .with_delay(Duration::from_millis(200));
    let harness = TestHarness::new(stub);
    let repo = harness.repository.clone();

    let task = tokio::spawn({
        let repo = repo.clone();
        async move { repo.get_infobases(CLUSTER, true).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        repo.entry_state(RecordKind::Infobases, Some(CLUSTER)),
        EntryState::Fetching
    );

    let infobases = task.await.unwrap();
    assert_eq!(infobases[0].name(), Some("Accounting"));
    assert!(matches!(
        repo.entry_state(RecordKind::Infobases, Some(CLUSTER)),
        EntryState::Cached { records: 1, .. }
    ));
}

#[tokio::test]
async fn metrics_count_sessions_and_background_jobs() {
    let (_listener, port) = listening_port().await;
    let connections = RacText::new()
        .connection("c-1", "BackgroundJob", minutes_ago(10))
        .connection("c-2", "JobScheduler", minutes_ago(90))
        .connection("c-3", "1CV8C", minutes_ago(1))
        .build();
    let stub = StubRunner::new()
        .with_output(
            "cluster list",
            RacText::new().cluster(CLUSTER, "Main", "127.0.0.1", port).build(),
        )
        .with_output("session list", three_sessions_two_active())
        .with_output("connection list", connections);
    let harness = TestHarness::new(stub);

    let snapshot = harness.repository.get_cluster_metrics(CLUSTER).await;
    assert_eq!(snapshot.cluster_id, CLUSTER);
    assert_eq!(snapshot.cluster_name.as_deref(), Some("Main"));
    assert_eq!(snapshot.counts.total_sessions, 3);
    assert_eq!(snapshot.counts.active_sessions, 2);
    assert_eq!(snapshot.counts.total_jobs, 2);
    assert_eq!(snapshot.counts.active_jobs, 1);
    assert_eq!(snapshot.status, ClusterStatus::Available);
    assert!(!snapshot.degraded);
}

#[tokio::test]
async fn metrics_with_no_jobs() {
    let stub = StubRunner::new()
        .with_output("session list", three_sessions_two_active())
        .with_output("connection list", "");
    let harness = TestHarness::new(stub);

    let json = serde_json::to_value(harness.repository.get_cluster_metrics(CLUSTER).await).unwrap();
    assert_eq!(json["total_sessions"], 3);
    assert_eq!(json["active_sessions"], 2);
    assert_eq!(json["total_jobs"], 0);
    assert_eq!(json["active_jobs"], 0);
}

#[tokio::test]
async fn failed_fetch_degrades_snapshot() {
    let stub = StubRunner::new()
        .with_error("session list", InvocationError::Timeout(Duration::from_secs(30)))
        .with_output(
            "connection list",
            RacText::new().connection("c-1", "BackgroundJob", minutes_ago(5)).build(),
        );
    let harness = TestHarness::new(stub);

    let snapshot = harness.repository.get_cluster_metrics(CLUSTER).await;
    assert!(snapshot.degraded);
    assert_eq!(snapshot.counts.total_sessions, 0);
    assert_eq!(snapshot.counts.active_jobs, 1);
    // Cluster list was never scripted, so the cluster is unknown
    assert_eq!(snapshot.status, ClusterStatus::Unknown);
}

#[tokio::test]
async fn unknown_cluster_yields_empty_lists() {
    let stub =
        StubRunner::new().with_failure("session list", 255, "Кластер не найден");
    let harness = TestHarness::new(stub);
    assert!(harness.repository.get_sessions("no-such-cluster").await.is_empty());
    assert!(harness.repository.get_jobs("no-such-cluster").await.is_empty());
}

#[tokio::test]
async fn job_list_source() {
    let jobs = RacText::new()
        .job("j-1", minutes_ago(5), Some("active"))
        .job("j-2", minutes_ago(5), Some("completed"))
        .job("j-3", minutes_ago(-10), None)
        .build();
    let mut options = TestHarness::default_options();
    options.jobs_source = JobsSource::JobList;
    let harness =
        TestHarness::with_options(StubRunner::new().with_output("job list", jobs), options);

    let all = harness.repository.get_jobs(CLUSTER).await;
    assert_eq!(all.len(), 3);
    let active = harness.repository.get_active_jobs(CLUSTER).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id(), Some("j-1"));
    harness.assert_invocations("connection list", 0).unwrap();
}

#[tokio::test]
async fn console_code_page_output_is_decoded() {
    let mut raw = b"session : s-1\nuser-name : ".to_vec();
    raw.extend_from_slice(&[0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2]);
    let tail = format!(
        "\nlast-active-at : {}\nhibernate : no\n",
        rac_time(minutes_ago(1))
    );
    raw.extend_from_slice(tail.as_bytes());
    let harness = TestHarness::new(StubRunner::new().with_bytes("session list", raw));

    let sessions = harness.repository.get_active_sessions(CLUSTER).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_name(), Some("Привет"));
}

#[tokio::test]
async fn credentials_reach_rac_only_for_cluster_commands() {
    let mut options = TestHarness::default_options();
    options.endpoint =
        RacEndpoint::new("127.0.0.1", 1545).with_credentials("admin", Some("secret".into()));
    let stub = StubRunner::new()
        .with_output("cluster list", RacText::new().cluster(CLUSTER, "Main", "srv", 1541).build())
        .with_output("session list", "");
    let harness = TestHarness::with_options(stub, options);

    harness.repository.discover_clusters(false).await;
    harness.repository.get_sessions(CLUSTER).await;

    let invocations = harness.runner.invocations();
    assert!(!invocations[0].iter().any(|a| a.starts_with("--cluster-user")));
    assert!(invocations[1].contains(&"--cluster-user=admin".to_string()));
    assert!(invocations[1].contains(&"--cluster-pwd=secret".to_string()));
    assert_eq!(invocations[1].last().map(String::as_str), Some("127.0.0.1:1545"));
}

#[tokio::test]
async fn overview_and_summary() {
    let stub = StubRunner::new()
        .with_output("cluster list", RacText::new().cluster(CLUSTER, "Main", "srv", 1541).build())
        .with_output(
            "infobase summary list",
            RacText::new()
                .infobase("ib-1", "Accounting")
                .infobase("ib-2", "HR")
                .build(),
        )
        .with_output("session list", three_sessions_two_active())
        .with_output("connection list", "");
    let harness = TestHarness::new(stub);

    let overview = harness.repository.cluster_overview(CLUSTER).await;
    assert_eq!(overview.cluster.map(|c| c.name), Some("Main".to_string()));
    assert_eq!(overview.infobases.len(), 2);
    assert_eq!(overview.statistics.active_sessions, 2);

    let summary = harness.repository.get_sessions_summary(CLUSTER).await;
    assert_eq!(summary.unique_users, 3);
    assert_eq!(summary.hibernated_sessions, 1);
    assert_eq!(summary.applications["1CV8C"], 3);
}

#[tokio::test]
async fn infobase_summary_uses_cached_infobase_list() {
    const IB: &str = "00000000-0000-0000-0000-00000000000b";
    let stub = StubRunner::new()
        .with_output(
            "infobase summary list",
            RacText::new().infobase(IB, "Accounting").infobase("ib-2", "HR").build(),
        )
        .with_output("session list", three_sessions_two_active());
    let harness = TestHarness::new(stub);
    let repo = &harness.repository;

    repo.get_infobases(CLUSTER, false).await;
    let report = repo.get_infobase_summary(CLUSTER).await;
    assert_eq!(report.cluster_id, CLUSTER);
    assert_eq!(report.infobases.len(), 2);
    assert_eq!(report.infobases[0].total_sessions, 3);
    assert_eq!(report.infobases[0].active_sessions, 2);
    assert_eq!(report.infobases[0].unique_users, 3);
    assert!(report.infobases[0].last_activity.is_some());
    assert_eq!(report.infobases[1].total_sessions, 0);
    assert_eq!(report.unattributed_sessions, 0);
    harness.assert_invocations("infobase summary list", 1).unwrap();
}

#[tokio::test]
async fn refresh_status_updates_cached_cluster() {
    let (listener, port) = listening_port().await;
    let stub = StubRunner::new().with_output(
        "cluster list",
        RacText::new().cluster(CLUSTER, "Main", "127.0.0.1", port).build(),
    );
    let harness = TestHarness::new(stub);

    let repo = &harness.repository;
    assert_eq!(repo.refresh_cluster_status(CLUSTER).await, ClusterStatus::Available);
    drop(listener);
    assert_eq!(repo.refresh_cluster_status(CLUSTER).await, ClusterStatus::Unavailable);

    let cached = harness.repository.cached_clusters();
    assert_eq!(cached[0].status, ClusterStatus::Unavailable);
    assert_eq!(harness.repository.refresh_cluster_status(OTHER).await, ClusterStatus::Unknown);
    harness.assert_invocations("cluster list", 1).unwrap();
}
