//! Periodic scheduler.
//!
//! One trigger drives the whole pipeline: every tick the enabled networks
//! are processed sequentially through feed catalog sync, policy tracking,
//! fact sync and archive indexing. Ticks never overlap: the loop runs a
//! tick to completion before awaiting the next one, and ticks that fired
//! meanwhile are skipped. A shutdown signal lets the in-flight tick
//! drain.

use anyhow::Result;
use config::Config;
use pharos_common::{
    alert::Alerter, configuration::EnvironmentConfig, Datastore, Network,
};
use pharos_module_archive_indexer::ArchiveIndexer;
use pharos_module_chain_index::ChainIndexClient;
use pharos_module_fact_indexer::FactIndexer;
use pharos_module_feed_state::{FeedManifest, FeedSync};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const CONFIG_KEY_TICK_INTERVAL: &str = "tick_interval_secs";
const DEFAULT_TICK_INTERVAL_SECS: u64 = 600;

pub struct Scheduler {
    config: Arc<Config>,
    env: EnvironmentConfig,
    store: Arc<dyn Datastore>,
    alerter: Alerter,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        env: EnvironmentConfig,
        store: Arc<dyn Datastore>,
        alerter: Alerter,
    ) -> Self {
        Self {
            config,
            env,
            store,
            alerter,
        }
    }

    pub async fn run(self) -> Result<()> {
        let interval_secs = self
            .config
            .get::<u64>(CONFIG_KEY_TICK_INTERVAL)
            .unwrap_or(DEFAULT_TICK_INTERVAL_SECS);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs, "scheduler running");

        // Feed manifests fetched last tick, keyed by network id
        let mut manifests: HashMap<String, FeedManifest> = HashMap::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = std::time::Instant::now();
                    self.tick(&mut manifests).await;
                    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "tick complete");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// One tick: every enabled network in sequence. A failing network is
    /// alerted and the rest still run; checkpoints only move inside the
    /// per-network pipeline.
    async fn tick(&self, manifests: &mut HashMap<String, FeedManifest>) {
        let networks = match self.store.list_networks().await {
            Ok(networks) => networks,
            Err(e) => {
                self.alerter.alert(&format!("listing networks failed: {e:#}")).await;
                return;
            }
        };

        for mut network in networks.into_iter().filter(|n| n.is_enabled) {
            if let Err(e) = self.process_network(&mut network, manifests).await {
                self.alerter
                    .alert(&format!("{}: network tick failed: {e:#}", network.name))
                    .await;
            }
        }
    }

    /// Feed catalog first, so freshly indexed facts resolve against a
    /// reconciled catalog; then policy tracking and fact sync; archive
    /// resolution last, only where tracked.
    async fn process_network(
        &self,
        network: &mut Network,
        manifests: &mut HashMap<String, FeedManifest>,
    ) -> Result<()> {
        let feed_sync = FeedSync::new(self.store.clone());
        let manifest = feed_sync.sync(network, manifests.get(&network.id)).await?;
        manifests.insert(network.id.clone(), manifest);

        let client = ChainIndexClient::new(&network.chain_index_base_url)?;
        let indexer = FactIndexer::new(client, self.store.clone());
        let outcome = indexer.sync(network).await?;
        if outcome.indexed > 0 || outcome.already_indexed > 0 {
            info!(
                network = %network.name,
                indexed = outcome.indexed,
                already_indexed = outcome.already_indexed,
                "fact sync complete"
            );
        }
        if outcome.failed_transactions > 0 {
            self.alerter
                .alert(&format!(
                    "{}: {} transactions failed to index",
                    network.name, outcome.failed_transactions
                ))
                .await;
        }

        if network.track_archives {
            let archive_indexer =
                ArchiveIndexer::new(&self.env.primary_arweave_endpoint, self.store.clone())?;
            let archived = archive_indexer.run(network).await?;
            if archived.failed > 0 {
                self.alerter
                    .alert(&format!(
                        "{}: {} archival packages failed to resolve",
                        network.name, archived.failed
                    ))
                    .await;
            }
        }

        Ok(())
    }
}
