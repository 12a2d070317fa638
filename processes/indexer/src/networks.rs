//! First-boot network seeding from static configuration.
//!
//! Each `[[networks]]` entry describes one chain the indexer mirrors; any
//! entry missing from the store is created before the first tick. The
//! chain-index base URL comes from the required environment rather than
//! the seed entry.

use anyhow::Result;
use config::Config;
use pharos_common::{configuration::EnvironmentConfig, Datastore, Network};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSeed {
    pub name: String,
    pub fact_statement_pointer: String,
    pub script_token: String,
    pub active_feeds_url: String,
    pub zero_time: u64,
    pub zero_slot: u64,
    pub slot_length: u64,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub track_archives: bool,
    #[serde(default)]
    pub ignore_policies: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Create any configured network missing from the store. Returns every
/// stored network.
pub async fn seed_networks(
    config: &Config,
    env: &EnvironmentConfig,
    store: &Arc<dyn Datastore>,
) -> Result<Vec<Network>> {
    let seeds: Vec<NetworkSeed> = config.get("networks")?;
    let mut stored = store.list_networks().await?;

    for seed in seeds {
        if stored.iter().any(|n| n.name == seed.name) {
            continue;
        }
        let Some(base_url) = env.chain_index_base_url(&seed.name) else {
            warn!(network = %seed.name, "no chain-index base URL for network, skipping");
            continue;
        };

        let network = store
            .create_network(&Network {
                id: String::new(),
                name: seed.name.clone(),
                fact_statement_pointer: seed.fact_statement_pointer,
                script_token: seed.script_token,
                chain_index_base_url: base_url.to_string(),
                active_feeds_url: seed.active_feeds_url,
                zero_time: seed.zero_time,
                zero_slot: seed.zero_slot,
                slot_length: seed.slot_length,
                last_block_hash: String::new(),
                last_checkpoint_slot: 0,
                is_enabled: seed.is_enabled,
                track_archives: seed.track_archives,
                ignore_policies: seed.ignore_policies,
            })
            .await?;
        info!(network = %network.name, "seeded network");
        stored.push(network);
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharos_common::configuration::EnvironmentMode;
    use pharos_common::MemoryStore;

    fn env() -> EnvironmentConfig {
        EnvironmentConfig {
            mode: EnvironmentMode::Test,
            db_host: "http://127.0.0.1:8090".to_string(),
            db_email: "indexer@example.com".to_string(),
            db_password: "pw".to_string(),
            mainnet_chain_index_base_url: "http://kupo-mainnet".to_string(),
            preview_chain_index_base_url: "http://kupo-preview".to_string(),
            discord_webhook_url: "http://webhook".to_string(),
            primary_arweave_endpoint: "https://arweave.net/".to_string(),
            secondary_arweave_endpoint: "https://ar-io.net/".to_string(),
        }
    }

    fn seeds_config() -> Config {
        let toml = r#"
            [[networks]]
            name = "Mainnet"
            fact_statement_pointer = "a3931691f5c4e65d01c429e473d0dd24c51afdb6daf88e632a6c1e51"
            script_token = "6f7263666178"
            active_feeds_url = "https://orcfax.io/feeds.json"
            zero_time = 1596059091000
            zero_slot = 4492800
            slot_length = 1000
            track_archives = true

            [[networks]]
            name = "Preview"
            fact_statement_pointer = "b0645eab2a1bb48e74a49f2e0c13e505159bc6f65bd107e8d70ea9a0"
            script_token = "6f7263666178"
            active_feeds_url = "https://orcfax.io/feeds-preview.json"
            zero_time = 1666656000000
            zero_slot = 0
            slot_length = 1000
        "#;
        Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn seeds_missing_networks_once() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let networks = seed_networks(&seeds_config(), &env(), &store).await.unwrap();
        assert_eq!(networks.len(), 2);

        let mainnet = networks.iter().find(|n| n.name == "Mainnet").unwrap();
        assert_eq!(mainnet.chain_index_base_url, "http://kupo-mainnet");
        assert!(mainnet.track_archives);
        assert_eq!(mainnet.last_checkpoint_slot, 0);

        // A second boot leaves the stored rows alone
        let again = seed_networks(&seeds_config(), &env(), &store).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(store.list_networks().await.unwrap().len(), 2);
    }
}
