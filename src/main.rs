//! Dry-run driver: reconciles every Snapshot in a cluster state file against
//! an in-memory store and prints the effects that would have been applied.

use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use integration_train::config::ControllerConfig;
use integration_train::effects::EffectExecutor;
use integration_train::reconcile::SnapshotAdapter;
use integration_train::store::memory::snapshot_kinds;
use integration_train::store::{ClusterState, InMemoryCluster};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integration_train=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: integration-train <cluster-state.json>");
        return ExitCode::from(2);
    };

    let state = match ClusterState::from_json_file(&path) {
        Ok(state) => state,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load cluster state");
            return ExitCode::FAILURE;
        }
    };

    info!(
        snapshots = state.snapshots.len(),
        kinds = ?snapshot_kinds(&state),
        "Loaded cluster state"
    );

    let config = ControllerConfig::from_env();
    let names: Vec<_> = state.snapshots.iter().map(|s| s.name.clone()).collect();
    let cluster = InMemoryCluster::from_state(state);
    let executor = EffectExecutor::new(
        cluster.clone(),
        CancellationToken::new(),
        config.store_call_timeout,
    );

    let mut failed = false;
    for name in names {
        // Earlier reconciliations may have changed this snapshot.
        let Some(snapshot) = cluster.snapshot(name.as_str()) else {
            continue;
        };
        let mut adapter = SnapshotAdapter::new(snapshot, &cluster, &executor, &config);
        match adapter.reconcile_snapshot().await {
            Ok(result) => info!(snapshot = %name, ?result, "Reconciled snapshot"),
            Err(e) => {
                warn!(
                    snapshot = %name,
                    error = %e,
                    requeue = e.is_retriable(),
                    "Reconciliation failed"
                );
                failed = true;
            }
        }
    }

    for effect in cluster.applied() {
        match serde_json::to_string(&effect) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                error!(error = %e, "Failed to encode effect");
                return ExitCode::FAILURE;
            }
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}
