//! Boundary message shapes returned by the chain-index service

use serde::Deserialize;
use std::collections::HashMap;

/// One UTxO match as returned by `/matches/{pattern}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KupoMatch {
    pub transaction_index: u32,
    pub transaction_id: String,
    pub output_index: u32,
    pub address: String,
    pub value: KupoValue,
    #[serde(default)]
    pub datum_hash: Option<String>,
    #[serde(default)]
    pub datum_type: Option<String>,
    #[serde(default)]
    pub script_hash: Option<String>,
    pub created_at: ChainPoint,
    #[serde(default)]
    pub spent_at: Option<ChainPoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KupoValue {
    pub coins: u64,
    #[serde(default)]
    pub assets: HashMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainPoint {
    pub slot_no: u64,
    pub header_hash: String,
}

/// One entry of `/metadata/{slot}`: metadata of a transaction keyed by label
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataEnvelope {
    pub hash: String,
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub schema: HashMap<String, MetadataValue>,
}

/// The chain-index's schema rendering of a metadata value. Exactly one of
/// the fields is populated per value.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct MetadataValue {
    pub string: Option<String>,
    pub int: Option<i64>,
    pub bytes: Option<String>,
    pub list: Option<Vec<MetadataValue>>,
    pub map: Option<Vec<MetadataPair>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataPair {
    pub k: MetadataValue,
    pub v: MetadataValue,
}

impl MetadataValue {
    pub fn as_string(&self) -> Option<&str> {
        self.string.as_deref()
    }
}
