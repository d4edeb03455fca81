/*!
zbx1c kernel - REST service over the RAC pipeline

Loads `kernel.yaml`, shares one cluster repository between the HTTP API and
the background snapshot poller, and serves until interrupted.
*/

mod config;
mod health;
mod http;
mod snapshots;
mod state;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::state::{new_state, SnapshotMap};

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use zbx1c_agent::logging::init_logging;
use zbx1c_agent::ClusterRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = load_config().await?;
    init_logging(&cfg.agent.logging, false);
    cfg.agent.validate()?;

    let runner = cfg.agent.process_runner();
    let repo = Arc::new(ClusterRepository::new(runner, cfg.agent.repository_options()));
    info!(
        "using rac {} against {}",
        cfg.agent.rac.path.display(),
        repo.endpoint().address()
    );

    let snapshots = new_state(SnapshotMap::new());
    let health = HealthTracker::new();

    if cfg.snapshot_interval_secs > 0 {
        snapshots::spawn_snapshot_poller(
            Arc::clone(&repo),
            Arc::clone(&snapshots),
            health.clone(),
            Duration::from_secs(cfg.snapshot_interval_secs),
        );
    }

    let api_key = std::env::var("ZBX1C_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .map(Arc::<str>::from);
    if api_key.is_none() {
        info!("ZBX1C_API_KEY not set, API is open");
    }

    let app_state = AppState {
        repo,
        snapshots,
        health,
        api_key,
        rac_path: cfg.agent.rac.path.display().to_string(),
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.listen.as_str())
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    info!("listening on http://{}", cfg.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
