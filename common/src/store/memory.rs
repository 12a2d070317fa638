//! In-memory datastore (not persisted across runs)

use super::{Datastore, InsertOutcome};
use crate::types::{Asset, Feed, FactStatement, Network, Node, Policy, Source};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    networks: Vec<Network>,
    policies: Vec<Policy>,
    feeds: Vec<Feed>,
    assets: Vec<Asset>,
    facts: Vec<FactStatement>,
    nodes: Vec<Node>,
    sources: Vec<Source>,
}

impl Inner {
    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("rec{:012}", self.counter)
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn list_networks(&self) -> Result<Vec<Network>> {
        Ok(self.inner.lock().await.networks.clone())
    }

    async fn create_network(&self, network: &Network) -> Result<Network> {
        let mut inner = self.inner.lock().await;
        let mut network = network.clone();
        network.id = inner.next_id();
        inner.networks.push(network.clone());
        Ok(network)
    }

    async fn update_network(&self, network: &Network) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.networks.iter_mut().find(|n| n.id == network.id) {
            Some(stored) => {
                *stored = network.clone();
                Ok(())
            }
            None => bail!("no network with id {}", network.id),
        }
    }

    async fn list_policies(&self, network_id: &str) -> Result<Vec<Policy>> {
        let inner = self.inner.lock().await;
        let mut policies: Vec<Policy> =
            inner.policies.iter().filter(|p| p.network == network_id).cloned().collect();
        policies.sort_by_key(|p| p.starting_slot);
        Ok(policies)
    }

    async fn create_policy(&self, policy: &Policy) -> Result<Policy> {
        let mut inner = self.inner.lock().await;
        let mut policy = policy.clone();
        policy.id = inner.next_id();
        inner.policies.push(policy.clone());
        Ok(policy)
    }

    async fn list_feeds(&self, network_id: &str) -> Result<Vec<Feed>> {
        let inner = self.inner.lock().await;
        Ok(inner.feeds.iter().filter(|f| f.network == network_id).cloned().collect())
    }

    async fn create_feed(&self, feed: &Feed) -> Result<Feed> {
        let mut inner = self.inner.lock().await;
        let mut feed = feed.clone();
        feed.id = inner.next_id();
        inner.feeds.push(feed.clone());
        Ok(feed)
    }

    async fn update_feed(&self, feed: &Feed) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.feeds.iter_mut().find(|f| f.id == feed.id) {
            Some(stored) => {
                *stored = feed.clone();
                Ok(())
            }
            None => bail!("no feed with id {}", feed.id),
        }
    }

    async fn list_assets(&self) -> Result<Vec<Asset>> {
        Ok(self.inner.lock().await.assets.clone())
    }

    async fn create_asset(&self, asset: &Asset) -> Result<Asset> {
        let mut inner = self.inner.lock().await;
        if inner.assets.iter().any(|a| a.ticker.eq_ignore_ascii_case(&asset.ticker)) {
            bail!("asset ticker {} is not unique", asset.ticker);
        }
        let mut asset = asset.clone();
        asset.id = inner.next_id();
        inner.assets.push(asset.clone());
        Ok(asset)
    }

    async fn insert_fact(&self, fact: &FactStatement) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner
            .facts
            .iter()
            .any(|f| f.network == fact.network && f.fact_urn == fact.fact_urn);
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }
        let mut fact = fact.clone();
        fact.id = inner.next_id();
        inner.facts.push(fact);
        Ok(InsertOutcome::Inserted)
    }

    async fn update_fact(&self, fact: &FactStatement) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.facts.iter_mut().find(|f| f.id == fact.id) {
            Some(stored) => {
                *stored = fact.clone();
                Ok(())
            }
            None => bail!("no fact with id {}", fact.id),
        }
    }

    async fn delete_facts_with_slot_greater_than(
        &self,
        network_id: &str,
        slot: u64,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.facts.len();
        inner.facts.retain(|f| f.network != network_id || f.slot <= slot);
        Ok((before - inner.facts.len()) as u64)
    }

    async fn last_indexed_fact(&self, network_id: &str) -> Result<Option<FactStatement>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .iter()
            .filter(|f| f.network == network_id)
            .max_by_key(|f| f.slot)
            .cloned())
    }

    async fn list_unarchived_facts(&self, network_id: &str) -> Result<Vec<FactStatement>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .iter()
            .filter(|f| {
                f.network == network_id && !f.is_archive_indexed && !f.storage_urn.is_empty()
            })
            .cloned()
            .collect())
    }

    async fn list_nodes(&self, network_id: &str) -> Result<Vec<Node>> {
        let inner = self.inner.lock().await;
        Ok(inner.nodes.iter().filter(|n| n.network == network_id).cloned().collect())
    }

    async fn create_node(&self, node: &Node) -> Result<Node> {
        let mut inner = self.inner.lock().await;
        let mut node = node.clone();
        node.id = inner.next_id();
        inner.nodes.push(node.clone());
        Ok(node)
    }

    async fn list_sources(&self, network_id: &str) -> Result<Vec<Source>> {
        let inner = self.inner.lock().await;
        Ok(inner.sources.iter().filter(|s| s.network == network_id).cloned().collect())
    }

    async fn create_source(&self, source: &Source) -> Result<Source> {
        let mut inner = self.inner.lock().await;
        let mut source = source.clone();
        source.id = inner.next_id();
        inner.sources.push(source.clone());
        Ok(source)
    }

    async fn update_source(&self, source: &Source) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.sources.iter_mut().find(|s| s.id == source.id) {
            Some(stored) => {
                *stored = source.clone();
                Ok(())
            }
            None => bail!("no source with id {}", source.id),
        }
    }
}
