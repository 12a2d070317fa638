//! Pharos feed state module
//!
//! Reconciles the remote active-feeds manifest with stored feed records:
//! creates newly listed feeds, updates drifted fields, deactivates feeds
//! that fell out of the manifest, and lazily creates the referenced
//! assets.

use anyhow::{Context, Result};
use pharos_common::{
    Asset, Datastore, Feed, FeedSourceType, FeedStatus, FundingType, Network,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const MANIFEST_TIMEOUT: u64 = 30;

/// Feed ids carry a fixed catalog version
const FEED_ID_VERSION: &str = "3";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("active feeds request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("active feeds endpoint returned HTTP status {0}")]
    Status(reqwest::StatusCode),
}

/// The remote active-feeds manifest
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedManifest {
    pub meta: ManifestMeta,
    pub feeds: Vec<ManifestFeed>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestMeta {
    pub description: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestFeed {
    pub pair: String,
    pub label: String,
    /// Heartbeat, in seconds
    pub interval: u64,
    pub deviation: f64,
    pub source: ManifestSource,
    pub calculation: String,
    pub status: ManifestStatus,
    #[serde(rename = "type")]
    pub feed_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    Cex,
    Dex,
}

impl From<ManifestSource> for FeedSourceType {
    fn from(source: ManifestSource) -> Self {
        match source {
            ManifestSource::Cex => FeedSourceType::Cex,
            ManifestSource::Dex => FeedSourceType::Dex,
        }
    }
}

/// The manifest's "status" is the feed's funding arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Showcase,
    Subsidized,
    Paid,
}

impl From<ManifestStatus> for FundingType {
    fn from(status: ManifestStatus) -> Self {
        match status {
            ManifestStatus::Showcase => FundingType::Showcase,
            ManifestStatus::Subsidized => FundingType::Subsidized,
            ManifestStatus::Paid => FundingType::Paid,
        }
    }
}

pub struct FeedSync {
    client: reqwest::Client,
    store: Arc<dyn Datastore>,
}

impl FeedSync {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
        }
    }

    /// Fetch the manifest and reconcile it against the stored catalog.
    /// When the fetched manifest equals `cached` the store is untouched.
    /// Returns the fresh manifest as the next-iteration cache.
    pub async fn sync(
        &self,
        network: &Network,
        cached: Option<&FeedManifest>,
    ) -> Result<FeedManifest> {
        let manifest = self.fetch_manifest(&network.active_feeds_url).await?;
        if cached == Some(&manifest) {
            debug!(network = %network.name, "active feeds unchanged");
            return Ok(manifest);
        }

        let mut feeds = self.store.list_feeds(&network.id).await?;
        let mut assets = self.store.list_assets().await?;

        for entry in &manifest.feeds {
            let feed_id = format!("{}/{}/{}", entry.feed_type, entry.label, FEED_ID_VERSION);

            let Some((base, quote)) = split_label(&entry.label) else {
                warn!(label = %entry.label, "feed label does not name exactly two assets");
                continue;
            };
            let base_asset = self.ensure_asset(&mut assets, base).await?;
            let quote_asset = self.ensure_asset(&mut assets, quote).await?;

            match feeds.iter().position(|f| f.feed_id == feed_id) {
                None => {
                    let feed = Feed {
                        id: String::new(),
                        network: network.id.clone(),
                        feed_id: feed_id.clone(),
                        feed_type: entry.feed_type.clone(),
                        name: entry.pair.clone(),
                        version: FEED_ID_VERSION.to_string(),
                        status: FeedStatus::Active,
                        source_type: entry.source.into(),
                        funding_type: entry.status.into(),
                        calculation_method: entry.calculation.clone(),
                        heartbeat_interval: entry.interval,
                        deviation: entry.deviation,
                        base_asset,
                        quote_asset,
                    };
                    let created = self.store.create_feed(&feed).await?;
                    info!(%feed_id, "created feed");
                    feeds.push(created);
                }
                Some(index) => {
                    let stored = &mut feeds[index];
                    if apply_manifest_fields(stored, entry) {
                        self.store.update_feed(stored).await?;
                        info!(%feed_id, "updated feed from manifest");
                    }
                }
            }
        }

        // Feeds that fell out of the manifest go inactive
        for feed in feeds.iter_mut().filter(|f| f.status == FeedStatus::Active) {
            let listed = manifest.feeds.iter().any(|entry| {
                format!("{}/{}/{}", entry.feed_type, entry.label, FEED_ID_VERSION) == feed.feed_id
            });
            if !listed {
                feed.status = FeedStatus::Inactive;
                self.store.update_feed(feed).await?;
                info!(feed_id = %feed.feed_id, "deactivated feed absent from manifest");
            }
        }

        Ok(manifest)
    }

    async fn fetch_manifest(&self, url: &str) -> Result<FeedManifest> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(MANIFEST_TIMEOUT))
            .send()
            .await
            .map_err(ManifestError::Request)?;
        if !response.status().is_success() {
            return Err(ManifestError::Status(response.status()).into());
        }
        response
            .json::<FeedManifest>()
            .await
            .map_err(ManifestError::Request)
            .context("active feeds manifest not understood")
    }

    /// Look an asset up by ticker, case-insensitively, creating it when
    /// missing. Returns the record id.
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
        info!(ticker, "created asset");
        let id = created.id.clone();
        assets.push(created);
        Ok(id)
    }
}

/// Split a manifest label into its two asset tickers
fn split_label(label: &str) -> Option<(&str, &str)> {
    let mut parts = label.split(['/', '-']);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
            Some((base, quote))
        }
        _ => None,
    }
}

/// Copy the six manifest-mutable fields onto a stored feed. Returns
/// whether anything changed.
fn apply_manifest_fields(feed: &mut Feed, entry: &ManifestFeed) -> bool {
    let source_type: FeedSourceType = entry.source.into();
    let funding_type: FundingType = entry.status.into();

    let changed = feed.name != entry.pair
        || feed.source_type != source_type
        || feed.funding_type != funding_type
        || feed.calculation_method != entry.calculation
        || feed.heartbeat_interval != entry.interval
        || feed.deviation != entry.deviation;

    if changed {
        feed.name = entry.pair.clone();
        feed.source_type = source_type;
        feed.funding_type = funding_type;
        feed.calculation_method = entry.calculation.clone();
        feed.heartbeat_interval = entry.interval;
        feed.deviation = entry.deviation;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharos_common::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manifest_body(feeds: serde_json::Value) -> serde_json::Value {
        json!({
            "meta": { "description": "Active Orcfax feeds", "version": "1" },
            "feeds": feeds,
        })
    }

    fn ada_usd(interval: u64) -> serde_json::Value {
        json!({
            "pair": "ADA-USD",
            "label": "ADA-USD",
            "interval": interval,
            "deviation": 1.0,
            "source": "cex",
            "calculation": "median",
            "status": "showcase",
            "type": "CER",
        })
    }

    async fn network_for(server: &MockServer, store: &Arc<dyn Datastore>) -> Network {
        let network = Network {
            id: String::new(),
            name: "Preview".to_string(),
            fact_statement_pointer: "pointer".to_string(),
            script_token: "token".to_string(),
            chain_index_base_url: "http://unused".to_string(),
            active_feeds_url: format!("{}/feeds.json", server.uri()),
            zero_time: 1_666_656_000_000,
            zero_slot: 0,
            slot_length: 1_000,
            last_block_hash: String::new(),
            last_checkpoint_slot: 0,
            is_enabled: true,
            track_archives: false,
            ignore_policies: vec![],
        };
        store.create_network(&network).await.unwrap()
    }

    #[tokio::test]
    async fn creates_feed_and_assets_from_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(manifest_body(json!([ada_usd(3600)]))),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let network = network_for(&server, &store).await;

        let sync = FeedSync::new(store.clone());
        let manifest = sync.sync(&network, None).await.unwrap();
        assert_eq!(manifest.feeds.len(), 1);

        let feeds = store.list_feeds(&network.id).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].feed_id, "CER/ADA-USD/3");
        assert_eq!(feeds[0].status, FeedStatus::Active);
        assert_eq!(feeds[0].heartbeat_interval, 3600);

        let assets = store.list_assets().await.unwrap();
        let mut tickers: Vec<&str> = assets.iter().map(|a| a.ticker.as_str()).collect();
        tickers.sort();
        assert_eq!(tickers, vec!["ADA", "USD"]);

        // A second run with the manifest cached leaves everything alone
        let manifest = sync.sync(&network, Some(&manifest)).await.unwrap();
        assert_eq!(store.list_feeds(&network.id).await.unwrap().len(), 1);
        assert_eq!(manifest.feeds.len(), 1);
    }

    #[tokio::test]
    async fn updates_drifted_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(manifest_body(json!([ada_usd(7200)]))),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let network = network_for(&server, &store).await;

        let sync = FeedSync::new(store.clone());
        // Seed with an hourly heartbeat, then reconcile against 7200
        let stale = FeedManifest {
            meta: ManifestMeta {
                description: "Active Orcfax feeds".to_string(),
                version: "1".to_string(),
            },
            feeds: vec![serde_json::from_value(ada_usd(3600)).unwrap()],
        };
        let mut feed: Feed = {
            let entry = &stale.feeds[0];
            Feed {
                id: String::new(),
                network: network.id.clone(),
                feed_id: "CER/ADA-USD/3".to_string(),
                feed_type: entry.feed_type.clone(),
                name: entry.pair.clone(),
                version: "3".to_string(),
                status: FeedStatus::Active,
                source_type: entry.source.into(),
                funding_type: entry.status.into(),
                calculation_method: entry.calculation.clone(),
                heartbeat_interval: entry.interval,
                deviation: entry.deviation,
                base_asset: "a1".to_string(),
                quote_asset: "a2".to_string(),
            }
        };
        feed = store.create_feed(&feed).await.unwrap();

        sync.sync(&network, None).await.unwrap();
        let feeds = store.list_feeds(&network.id).await.unwrap();
        assert_eq!(feeds[0].id, feed.id);
        assert_eq!(feeds[0].heartbeat_interval, 7200);
    }

    #[tokio::test]
    async fn deactivates_feeds_missing_from_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(manifest_body(json!([]))))
            .mount(&server)
            .await;

        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let network = network_for(&server, &store).await;

        let feed = Feed {
            id: String::new(),
            network: network.id.clone(),
            feed_id: "CER/ADA-USD/3".to_string(),
            feed_type: "CER".to_string(),
            name: "ADA-USD".to_string(),
            version: "3".to_string(),
            status: FeedStatus::Active,
            source_type: FeedSourceType::Cex,
            funding_type: FundingType::Showcase,
            calculation_method: "median".to_string(),
            heartbeat_interval: 3600,
            deviation: 1.0,
            base_asset: "a1".to_string(),
            quote_asset: "a2".to_string(),
        };
        store.create_feed(&feed).await.unwrap();

        FeedSync::new(store.clone()).sync(&network, None).await.unwrap();
        let feeds = store.list_feeds(&network.id).await.unwrap();
        assert_eq!(feeds[0].status, FeedStatus::Inactive);
    }

    #[tokio::test]
    async fn malformed_label_is_skipped() {
        let server = MockServer::start().await;
        let mut bad = ada_usd(3600);
        bad["label"] = json!("ADAUSD");
        Mock::given(method("GET"))
            .and(path("/feeds.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(manifest_body(json!([bad]))))
            .mount(&server)
            .await;

        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let network = network_for(&server, &store).await;

        FeedSync::new(store.clone()).sync(&network, None).await.unwrap();
        assert!(store.list_feeds(&network.id).await.unwrap().is_empty());
        assert!(store.list_assets().await.unwrap().is_empty());
    }
}
