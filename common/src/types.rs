//! Core type definitions for Pharos

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A Cardano network the indexer mirrors, with its chain-index endpoint,
/// oracle script pointers and slot clock parameters.
///
/// Policies belonging to a network are stored separately with a `network`
/// foreign key and hydrated ordered by `starting_slot` at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Display name, e.g. "Mainnet" or "Preview"
    pub name: String,

    /// Hex policy id of the oracle's fact-statement-pointer script
    pub fact_statement_pointer: String,

    /// Hex asset name of the pointer token
    pub script_token: String,

    /// Base URL of the chain-index (Kupo) service for this network
    pub chain_index_base_url: String,

    /// URL of the remote active-feeds manifest
    pub active_feeds_url: String,

    /// Wall-clock time of slot `zero_slot`, in milliseconds since epoch
    pub zero_time: u64,

    /// First slot of the linear slot era
    pub zero_slot: u64,

    /// Slot length in milliseconds
    pub slot_length: u64,

    /// Block hash (etag) of the last processed matches response
    #[serde(default)]
    pub last_block_hash: String,

    /// Most recent chain-index checkpoint slot we have committed
    #[serde(default)]
    pub last_checkpoint_slot: u64,

    pub is_enabled: bool,

    /// Whether archival packages are fetched and indexed for this network
    #[serde(default)]
    pub track_archives: bool,

    /// Policy ids to drop from the discovered lineage
    #[serde(default)]
    pub ignore_policies: Vec<String>,
}

/// One entry of a network's fact-statement policy lineage.
///
/// Within a network, policies are ordered by `starting_slot` ascending and
/// the last one is current. Policies are appended, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Owning network record id
    pub network: String,

    /// Hex policy id
    pub policy_id: String,

    /// Slot of the pointer match that introduced this policy
    pub starting_slot: u64,

    pub starting_block_hash: String,

    pub starting_date: DateTime<Utc>,
}

/// An indexed on-chain oracle publication.
///
/// Created append-only by the syncer, patched exactly once by the archive
/// indexer. Unique per `(network, fact_urn)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactStatement {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub network: String,
    pub feed: String,
    pub policy: String,

    pub fact_urn: String,

    /// Empty when archival to permanent storage failed for this fact
    #[serde(default)]
    pub storage_urn: String,

    pub transaction_id: String,
    pub block_hash: String,
    pub slot: u64,
    pub address: String,
    pub output_index: u32,

    /// Hex BLAKE2b-256 of `datum_hash || fact_urn`
    pub statement_hash: String,

    pub value: f64,
    pub value_inverse: f64,

    /// Derived from the publication slot
    pub publication_date: DateTime<Utc>,

    /// Carried inside the datum
    pub validation_date: DateTime<Utc>,

    /// Lovelace spent on the publishing transaction, in ada
    pub publication_cost: f64,

    pub datum_hash: String,

    #[serde(default)]
    pub is_archive_indexed: bool,

    // Filled by the archive indexer
    #[serde(default)]
    pub content_signature: String,
    #[serde(default)]
    pub collection_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participating_nodes: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Inactive,
}

impl Display for FeedStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedStatus::Active => write!(f, "active"),
            FeedStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Where a feed's value is sampled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSourceType {
    #[serde(rename = "CEX")]
    Cex,
    #[serde(rename = "DEX")]
    Dex,
    #[serde(rename = "")]
    Unknown,
}

impl Display for FeedSourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedSourceType::Cex => write!(f, "CEX"),
            FeedSourceType::Dex => write!(f, "DEX"),
            FeedSourceType::Unknown => write!(f, ""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingType {
    Showcase,
    Paid,
    Subsidized,
    #[serde(rename = "")]
    Unknown,
}

impl Display for FundingType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FundingType::Showcase => write!(f, "showcase"),
            FundingType::Paid => write!(f, "paid"),
            FundingType::Subsidized => write!(f, "subsidized"),
            FundingType::Unknown => write!(f, ""),
        }
    }
}

/// A price feed published by the oracle, reconciled against the remote
/// active-feeds manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub network: String,

    /// "type/label/version", e.g. "CER/ADA-USD/3"
    pub feed_id: String,

    #[serde(rename = "type")]
    pub feed_type: String,

    pub name: String,
    pub version: String,

    pub status: FeedStatus,
    pub source_type: FeedSourceType,
    pub funding_type: FundingType,

    #[serde(default)]
    pub calculation_method: String,

    /// Publication heartbeat, in seconds
    #[serde(default)]
    pub heartbeat_interval: u64,

    /// Deviation threshold triggering an off-heartbeat publication
    #[serde(default)]
    pub deviation: f64,

    /// Asset record ids
    pub base_asset: String,
    pub quote_asset: String,
}

/// A currency or token referenced by feeds. Ticker is unique,
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub ticker: String,

    #[serde(default)]
    pub fingerprint: Option<String>,

    #[serde(default)]
    pub has_xerberus_risk_rating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Federated,
    Decentralized,
    Itn,
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Federated => write!(f, "federated"),
            NodeType::Decentralized => write!(f, "decentralized"),
            NodeType::Itn => write!(f, "itn"),
        }
    }
}

/// An oracle node observed in an archival package. Unique per
/// `(network, node_urn)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub network: String,
    pub node_urn: String,
    pub name: String,
    pub status: String,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub geo: Option<String>,
}

/// How a source's data was collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "CEX API")]
    CexApi,
    #[serde(rename = "DEX LP")]
    DexLp,
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::CexApi => write!(f, "CEX API"),
            SourceType::DexLp => write!(f, "DEX LP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Inactive,
}

/// A price source observed in archival packages, anchored on `recipient`
/// within a network.
///
/// When a sender reappears with a new recipient the old record goes
/// inactive and a new one is created carrying the presentation fields
/// forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub network: String,
    pub name: String,

    #[serde(rename = "type")]
    pub source_type: SourceType,

    pub sender: String,
    pub recipient: String,
    pub status: SourceStatus,

    // Presentation metadata, carried forward across recipient rotations
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(default)]
    pub background_color: String,
}

/// The `(slot, block hash)` pair tracked per network to resume incremental
/// sync and detect rollbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub slot: u64,
    pub block_hash: String,
}
