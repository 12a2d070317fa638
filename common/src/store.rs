//! Datastore boundary consumed by the indexing pipeline.
//!
//! The external record store is the single consistent source of truth;
//! in-memory caches held by the scheduler are reconstructed from it on
//! restart.

use crate::types::{Asset, Feed, FactStatement, Network, Node, Policy, Source};
use anyhow::Result;
use async_trait::async_trait;

mod memory;
mod record_api;

pub use memory::MemoryStore;
pub use record_api::{RecordApiStore, StoreError};

/// Outcome of a fact insert: uniqueness conflicts on `(network, fact_urn)`
/// are a recognized signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn list_networks(&self) -> Result<Vec<Network>>;
    async fn create_network(&self, network: &Network) -> Result<Network>;
    async fn update_network(&self, network: &Network) -> Result<()>;

    /// Policies of a network, ordered by `starting_slot` ascending
    async fn list_policies(&self, network_id: &str) -> Result<Vec<Policy>>;
    async fn create_policy(&self, policy: &Policy) -> Result<Policy>;

    async fn list_feeds(&self, network_id: &str) -> Result<Vec<Feed>>;
    async fn create_feed(&self, feed: &Feed) -> Result<Feed>;
    async fn update_feed(&self, feed: &Feed) -> Result<()>;

    async fn list_assets(&self) -> Result<Vec<Asset>>;
    async fn create_asset(&self, asset: &Asset) -> Result<Asset>;

    async fn insert_fact(&self, fact: &FactStatement) -> Result<InsertOutcome>;
    async fn update_fact(&self, fact: &FactStatement) -> Result<()>;

    /// Rollback repair: drop all facts of a network above a slot.
    /// Returns the number of facts removed.
    async fn delete_facts_with_slot_greater_than(
        &self,
        network_id: &str,
        slot: u64,
    ) -> Result<u64>;

    /// The fact with the highest slot, if any
    async fn last_indexed_fact(&self, network_id: &str) -> Result<Option<FactStatement>>;

    /// Facts with `is_archive_indexed == false` and a non-empty storage URN
    async fn list_unarchived_facts(&self, network_id: &str) -> Result<Vec<FactStatement>>;

    async fn list_nodes(&self, network_id: &str) -> Result<Vec<Node>>;
    async fn create_node(&self, node: &Node) -> Result<Node>;

    async fn list_sources(&self, network_id: &str) -> Result<Vec<Source>>;
    async fn create_source(&self, source: &Source) -> Result<Source>;
    async fn update_source(&self, source: &Source) -> Result<()>;
}
