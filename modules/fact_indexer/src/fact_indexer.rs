//! Pharos fact indexer module
//!
//! Advances each network's fact-statement index from its stored
//! checkpoint: discovers the policy lineage on first boot, backfills an
//! empty index in day-sized slot windows, applies conditional incremental
//! fetches, repairs chain rollbacks and decodes every matched output into
//! a persisted fact statement.

pub mod policy;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::future::join_all;
use pharos_common::{
    calculations::{SlotClock, TimePeriod},
    crypto::statement_hash,
    Asset, Checkpoint, Datastore, FactStatement, Feed, FeedSourceType, FeedStatus, FundingType,
    InsertOutcome, Network, Policy,
};
use pharos_module_chain_index::{
    types::KupoMatch, ChainIndexClient, MatchOrder, MatchQuery, MatchesResponse,
};
use pharos_module_fact_unpacker::{
    decode_currency_pair_datum, decode_fact_metadata, CurrencyPairDatum,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const LOVELACE_PER_ADA: f64 = 1_000_000.0;

/// Protocol violations observed while indexing one transaction. Any of
/// these fails the transaction and holds the checkpoint back.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("outputs of transaction {0} span multiple slots")]
    HeterogeneousSlots(String),

    #[error("output {output_index} of transaction {transaction_id} has no datum hash")]
    MissingDatumHash {
        transaction_id: String,
        output_index: u32,
    },

    #[error("datum {0} is not resolvable")]
    MissingDatum(String),

    #[error("transaction {transaction_id} metadata lists {entries} entries for {outputs} outputs")]
    MetadataMismatch {
        transaction_id: String,
        entries: usize,
        outputs: usize,
    },
}

/// Counters of one sync pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub indexed: u64,
    pub already_indexed: u64,
    pub failed_transactions: u64,
}

impl SyncOutcome {
    fn absorb(&mut self, other: SyncOutcome) {
        self.indexed += other.indexed;
        self.already_indexed += other.already_indexed;
        self.failed_transactions += other.failed_transactions;
    }
}

pub struct FactIndexer {
    client: ChainIndexClient,
    store: Arc<dyn Datastore>,
}

impl FactIndexer {
    pub fn new(client: ChainIndexClient, store: Arc<dyn Datastore>) -> Self {
        Self { client, store }
    }

    /// One tick for a network: reconcile the policy lineage, then backfill
    /// an empty index or advance it incrementally.
    pub async fn sync(&self, network: &mut Network) -> Result<SyncOutcome> {
        let mut policies = self.store.list_policies(&network.id).await?;
        let rotated = if policies.is_empty() {
            policies = policy::discover_lineage(&self.client, &self.store, network).await?;
            None
        } else {
            policy::check_rotation(&self.client, &self.store, network, &mut policies).await?
        };

        if policies.is_empty() {
            warn!(network = %network.name, "no policies discovered, nothing to index");
            return Ok(SyncOutcome::default());
        }

        let mut feeds = self.store.list_feeds(&network.id).await?;
        let last_fact = self.store.last_indexed_fact(&network.id).await?;

        match (last_fact, rotated) {
            (None, _) => self.backfill(network, &policies, &mut feeds).await,
            (Some(last), Some(new_policy)) => {
                self.sync_rotation(network, &policies, &new_policy, &last, &mut feeds).await
            }
            (Some(_), None) => self.sync_incremental(network, &policies, &mut feeds).await,
        }
    }

    /// Populate an empty index: for each policy, walk day-sized slot
    /// windows from the lineage origin up to now.
    async fn backfill(
        &self,
        network: &mut Network,
        policies: &[Policy],
        feeds: &mut Vec<Feed>,
    ) -> Result<SyncOutcome> {
        let clock = SlotClock::from_network(network);
        let origin = policies[0].starting_slot;
        let latest = clock.date_to_slot(Utc::now());
        let mut outcome = SyncOutcome::default();
        let mut checkpoint: Option<Checkpoint> = None;

        info!(network = %network.name, origin, latest, "backfilling empty index");

        for policy in policies {
            let mut current = origin;
            while current < latest {
                let end = clock.slot_after_time_period(current, TimePeriod::Day).min(latest);
                let query = MatchQuery {
                    order: Some(MatchOrder::OldestFirst),
                    created_after: Some(current),
                    created_before: Some(end),
                    unspent: false,
                };
                match self.client.matches(&fact_pattern(policy), &query, None).await? {
                    MatchesResponse::Page(page) => {
                        checkpoint = Some(page.checkpoint.clone());
                        let partial =
                            self.index_matches(network, policy, page.matches, feeds).await?;
                        outcome.absorb(partial);
                    }
                    MatchesResponse::NotModified => {}
                }
                current = end;
            }
        }

        self.commit_checkpoint(network, checkpoint, &outcome).await?;
        info!(
            network = %network.name,
            indexed = outcome.indexed,
            "backfill complete"
        );
        Ok(outcome)
    }

    /// The lineage rotated this tick: close out the old policy up to the
    /// rotation slot, then continue unbounded under the new one.
    async fn sync_rotation(
        &self,
        network: &mut Network,
        policies: &[Policy],
        new_policy: &Policy,
        last_fact: &FactStatement,
        feeds: &mut Vec<Feed>,
    ) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        let mut checkpoint: Option<Checkpoint> = None;

        if let Some(old_policy) = policies.iter().rev().nth(1) {
            let query = MatchQuery {
                order: Some(MatchOrder::OldestFirst),
                created_after: Some(last_fact.slot),
                created_before: Some(new_policy.starting_slot),
                unspent: false,
            };
            if let MatchesResponse::Page(page) =
                self.client.matches(&fact_pattern(old_policy), &query, None).await?
            {
                checkpoint = Some(page.checkpoint.clone());
                let partial = self.index_matches(network, old_policy, page.matches, feeds).await?;
                outcome.absorb(partial);
            }
        }

        let resume = self
            .store
            .last_indexed_fact(&network.id)
            .await?
            .map(|f| f.slot)
            .unwrap_or(last_fact.slot);
        let query = MatchQuery {
            order: Some(MatchOrder::OldestFirst),
            created_after: Some(resume),
            created_before: None,
            unspent: false,
        };
        if let MatchesResponse::Page(page) =
            self.client.matches(&fact_pattern(new_policy), &query, None).await?
        {
            checkpoint = Some(page.checkpoint.clone());
            let partial = self.index_matches(network, new_policy, page.matches, feeds).await?;
            outcome.absorb(partial);
        }

        self.commit_checkpoint(network, checkpoint, &outcome).await?;
        Ok(outcome)
    }

    /// Steady state: a conditional fetch from the stored checkpoint under
    /// the current policy, with rollback repair.
    async fn sync_incremental(
        &self,
        network: &mut Network,
        policies: &[Policy],
        feeds: &mut Vec<Feed>,
    ) -> Result<SyncOutcome> {
        let Some(current) = policies.last() else {
            bail!("no current policy");
        };

        let if_none_match =
            (!network.last_block_hash.is_empty()).then(|| network.last_block_hash.clone());
        let query = MatchQuery {
            order: Some(MatchOrder::OldestFirst),
            created_after: Some(network.last_checkpoint_slot),
            created_before: None,
            unspent: false,
        };
        let page = match self
            .client
            .matches(&fact_pattern(current), &query, if_none_match.as_deref())
            .await?
        {
            MatchesResponse::NotModified => {
                debug!(network = %network.name, "chain unchanged");
                return Ok(SyncOutcome::default());
            }
            MatchesResponse::Page(page) => page,
        };

        // A server checkpoint older than ours means recent history was
        // reorganized; facts still on-chain reappear in the fresh batch.
        if page.checkpoint.slot < network.last_checkpoint_slot {
            let removed = self
                .store
                .delete_facts_with_slot_greater_than(&network.id, page.checkpoint.slot)
                .await?;
            warn!(
                network = %network.name,
                stored = network.last_checkpoint_slot,
                server = page.checkpoint.slot,
                removed,
                "chain rollback detected, index repaired"
            );
        }

        let outcome = self.index_matches(network, current, page.matches, feeds).await?;
        self.commit_checkpoint(network, Some(page.checkpoint), &outcome).await?;
        Ok(outcome)
    }

    /// Advance the stored checkpoint, but only when every transaction of
    /// the batch was applied.
    async fn commit_checkpoint(
        &self,
        network: &mut Network,
        checkpoint: Option<Checkpoint>,
        outcome: &SyncOutcome,
    ) -> Result<()> {
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        if outcome.failed_transactions > 0 {
            warn!(
                network = %network.name,
                failed = outcome.failed_transactions,
                "holding checkpoint back after transaction failures"
            );
            return Ok(());
        }
        network.last_block_hash = checkpoint.block_hash;
        network.last_checkpoint_slot = checkpoint.slot;
        self.store.update_network(network).await
    }

    /// Index a batch of matches grouped per transaction. A failing
    /// transaction is logged and counted; the batch continues.
    async fn index_matches(
        &self,
        network: &Network,
        policy: &Policy,
        matches: Vec<KupoMatch>,
        feeds: &mut Vec<Feed>,
    ) -> Result<SyncOutcome> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<KupoMatch>> = HashMap::new();
        for m in matches {
            if !groups.contains_key(&m.transaction_id) {
                order.push(m.transaction_id.clone());
            }
            groups.entry(m.transaction_id.clone()).or_default().push(m);
        }

        let mut outcome = SyncOutcome::default();
        for transaction_id in order {
            let mut outputs = groups.remove(&transaction_id).unwrap_or_default();
            outputs.sort_by_key(|m| m.output_index);
            match self.index_transaction(network, policy, &transaction_id, &outputs, feeds).await
            {
                Ok(partial) => outcome.absorb(partial),
                Err(e) => {
                    error!(%transaction_id, "failed to index transaction: {e:#}");
                    outcome.failed_transactions += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Index one transaction's outputs, fetching its metadata once and
    /// every output's datum concurrently.
    async fn index_transaction(
        &self,
        network: &Network,
        policy: &Policy,
        transaction_id: &str,
        outputs: &[KupoMatch],
        feeds: &mut Vec<Feed>,
    ) -> Result<SyncOutcome> {
        let Some(first) = outputs.first() else {
            return Ok(SyncOutcome::default());
        };
        let slot = first.created_at.slot_no;
        if outputs.iter().any(|o| o.created_at.slot_no != slot) {
            return Err(IndexError::HeterogeneousSlots(transaction_id.to_string()).into());
        }

        let envelopes = self.client.metadata(slot, transaction_id).await?;
        let urns = decode_fact_metadata(&envelopes)?;
        if urns.len() < outputs.len() {
            return Err(IndexError::MetadataMismatch {
                transaction_id: transaction_id.to_string(),
                entries: urns.len(),
                outputs: outputs.len(),
            }
            .into());
        }

        let mut datum_hashes = Vec::with_capacity(outputs.len());
        for output in outputs {
            let hash = output.datum_hash.as_deref().ok_or(IndexError::MissingDatumHash {
                transaction_id: transaction_id.to_string(),
                output_index: output.output_index,
            })?;
            datum_hashes.push(hash);
        }
        let bodies = join_all(datum_hashes.iter().map(|hash| self.client.datum(hash))).await;

        let clock = SlotClock::from_network(network);
        let mut outcome = SyncOutcome::default();

        for (index, output) in outputs.iter().enumerate() {
            let datum_hex = bodies[index]
                .as_ref()
                .map_err(|e| anyhow::anyhow!("datum fetch failed: {e}"))?
                .as_ref()
                .ok_or_else(|| IndexError::MissingDatum(datum_hashes[index].to_string()))?;
            let datum = decode_currency_pair_datum(datum_hex)?;
            let meta = &urns[index];
            let feed = self.ensure_feed(network, feeds, &datum).await?;

            let fact = FactStatement {
                id: String::new(),
                network: network.id.clone(),
                feed,
                policy: policy.id.clone(),
                fact_urn: meta.fact_urn.clone(),
                storage_urn: meta.storage_urn.clone(),
                transaction_id: transaction_id.to_string(),
                block_hash: output.created_at.header_hash.clone(),
                slot,
                address: output.address.clone(),
                output_index: output.output_index,
                statement_hash: statement_hash(&datum.datum_hash, &meta.fact_urn),
                value: datum.value,
                value_inverse: datum.inverse_value,
                publication_date: clock.slot_to_date(slot),
                validation_date: datum.validation_date,
                publication_cost: output.value.coins as f64 / LOVELACE_PER_ADA,
                datum_hash: datum.datum_hash.clone(),
                is_archive_indexed: false,
                content_signature: String::new(),
                collection_date: None,
                participating_nodes: vec![],
                sources: vec![],
            };

            match self.store.insert_fact(&fact).await? {
                InsertOutcome::Inserted => outcome.indexed += 1,
                InsertOutcome::Duplicate => {
                    debug!(fact_urn = %fact.fact_urn, "fact already indexed");
                    outcome.already_indexed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Resolve the datum's feed to a record id, creating a minimal
    /// inactive feed (and its assets) when unknown. The next catalog sync
    /// reconciles it.
    async fn ensure_feed(
        &self,
        network: &Network,
        feeds: &mut Vec<Feed>,
        datum: &CurrencyPairDatum,
    ) -> Result<String> {
        if let Some(feed) = feeds.iter().find(|f| f.feed_id == datum.feed_id) {
            return Ok(feed.id.clone());
        }

        let mut assets = self.store.list_assets().await?;
        let base_asset = self.ensure_asset(&mut assets, &datum.base_ticker).await?;
        let quote_asset = self.ensure_asset(&mut assets, &datum.quote_ticker).await?;

        let created = self
            .store
            .create_feed(&Feed {
                id: String::new(),
                network: network.id.clone(),
                feed_id: datum.feed_id.clone(),
                feed_type: datum.feed_type.clone(),
                name: datum.feed_name.clone(),
                version: datum.feed_version.clone(),
                status: FeedStatus::Inactive,
                source_type: FeedSourceType::Unknown,
                funding_type: FundingType::Unknown,
                calculation_method: String::new(),
                heartbeat_interval: 0,
                deviation: 0.0,
                base_asset,
                quote_asset,
            })
            .await?;
        info!(feed_id = %created.feed_id, "created minimal feed for unknown id");
        let id = created.id.clone();
        feeds.push(created);
        Ok(id)
    }

    async fn ensure_asset(&self, assets: &mut Vec<Asset>, ticker: &str) -> Result<String> {
        if let Some(asset) = assets.iter().find(|a| a.ticker.eq_ignore_ascii_case(ticker)) {
            return Ok(asset.id.clone());
        }
        let created = self
            .store
            .create_asset(&Asset {
                id: String::new(),
                ticker: ticker.to_string(),
                fingerprint: None,
                has_xerberus_risk_rating: false,
            })
            .await?;
        let id = created.id.clone();
        assets.push(created);
        Ok(id)
    }
}

fn fact_pattern(policy: &Policy) -> String {
    format!("{}.*", policy.policy_id)
}
