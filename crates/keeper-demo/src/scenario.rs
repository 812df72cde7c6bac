//! Competing-clients scenario
//!
//! Spawns `clients` tasks, each with its own session on a shared in-process
//! ensemble, and has each run `rounds` lock/use/release round trips against
//! one `LimitedResource`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use keeper_coordination::{CoordinationClient, MemoryEnsemble};
use keeper_lock::LockError;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::info;

use crate::config::DemoConfig;
use crate::operator::LockOperator;
use crate::resource::LimitedResource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub clients: usize,
    pub rounds: usize,
    pub acquisitions: u64,
    /// Rounds that found the resource busy while holding the lock
    pub conflicts: u64,
    pub failed_releases: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct ClientTally {
    acquisitions: u64,
    conflicts: u64,
    failed_releases: u64,
}

/// Run the scenario on a fresh in-process ensemble.
pub async fn run(config: &DemoConfig) -> anyhow::Result<ScenarioReport> {
    run_on(&MemoryEnsemble::new(), config).await
}

/// Run the scenario on an existing ensemble.
pub async fn run_on(
    ensemble: &MemoryEnsemble,
    config: &DemoConfig,
) -> anyhow::Result<ScenarioReport> {
    config.validate()?;
    let resource = Arc::new(LimitedResource::new(config.hold()));
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for i in 0..config.clients {
        let name = format!("C{}", i);
        let client: Arc<dyn CoordinationClient> = Arc::new(ensemble.connect());
        let lock_config = config.lock_config(&name);
        let resource = resource.clone();
        let rounds = config.rounds;
        let acquire_timeout = config.acquire_timeout();

        info!(client = %name, "Submitting client task");
        tasks.spawn(async move {
            let operator =
                LockOperator::new(name, client, lock_config, resource, acquire_timeout).await?;

            let mut tally = ClientTally::default();
            for round in 0..rounds {
                let outcome = operator.do_lock_once(round).await?;
                tally.acquisitions += 1;
                if outcome.conflict {
                    tally.conflicts += 1;
                }
                if !outcome.released {
                    tally.failed_releases += 1;
                }
            }
            operator.close().await;
            Ok::<_, LockError>(tally)
        });
    }

    let mut report = ScenarioReport {
        clients: config.clients,
        rounds: config.rounds,
        ..Default::default()
    };
    while let Some(joined) = tasks.join_next().await {
        let tally = joined.context("client task panicked")??;
        report.acquisitions += tally.acquisitions;
        report.conflicts += tally.conflicts;
        report.failed_releases += tally.failed_releases;
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        acquisitions = report.acquisitions,
        conflicts = report.conflicts,
        failed_releases = report.failed_releases,
        elapsed_ms = report.elapsed_ms,
        "Scenario finished"
    );
    Ok(report)
}
