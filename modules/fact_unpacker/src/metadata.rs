//! Extraction of fact and storage URNs from Orcfax transaction metadata
//! (label 1226).
//!
//! The label's list optionally leads with a ToS disclaimer string; the
//! remaining entries pair positionally with the transaction's outputs
//! sorted by output index.

use pharos_module_chain_index::types::{MetadataEnvelope, MetadataValue};
use thiserror::Error;

pub const ORCFAX_METADATA_LABEL: &str = "1226";

/// Accepted ToS disclaimer head strings
const TOS_DISCLAIMERS: [&str; 2] = [
    "Use oracle data at your own risk: https://orcfax.io/tos/",
    "Use oracle data at your own risk: https://orcfax.io/tos",
];

/// A storage URN carrying either sentinel marks a failed archival
const ARWEAVE_FAILURE_SENTINELS: [&str; 2] = [
    "arweave tx not created",
    "send to Arkly feature is not currently enabled",
];

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("transaction has no metadata entries")]
    Empty,

    #[error("metadata has no {ORCFAX_METADATA_LABEL} label")]
    MissingLabel,

    #[error("label {ORCFAX_METADATA_LABEL} does not hold a list")]
    NotAList,

    #[error("metadata entry {0} is not a map")]
    EntryNotAMap(usize),

    #[error("metadata entry {0} is missing the fact URN")]
    MissingFactUrn(usize),

    #[error("metadata entry {0} is missing the storage URN")]
    MissingStorageUrn(usize),
}

/// Per-output URNs extracted from the metadata list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatumMetadata {
    pub fact_urn: String,
    /// Empty when the archival to permanent storage failed
    pub storage_urn: String,
}

/// Decode the first envelope's label-1226 list. Entry `i` of the result
/// corresponds to the transaction's output index `i`.
pub fn decode_fact_metadata(
    envelopes: &[MetadataEnvelope],
) -> Result<Vec<DatumMetadata>, MetadataError> {
    let envelope = envelopes.first().ok_or(MetadataError::Empty)?;
    let label = envelope
        .schema
        .get(ORCFAX_METADATA_LABEL)
        .ok_or(MetadataError::MissingLabel)?;
    let list = label.list.as_ref().ok_or(MetadataError::NotAList)?;

    let entries = match list.first() {
        Some(head) if is_tos_disclaimer(head) => &list[1..],
        _ => &list[..],
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| decode_entry(index, entry))
        .collect()
}

fn decode_entry(index: usize, entry: &MetadataValue) -> Result<DatumMetadata, MetadataError> {
    let map = entry.map.as_ref().ok_or(MetadataError::EntryNotAMap(index))?;

    let fact_urn = map
        .first()
        .and_then(|pair| pair.v.as_string())
        .ok_or(MetadataError::MissingFactUrn(index))?
        .to_string();
    let storage_urn = map
        .get(1)
        .and_then(|pair| pair.v.as_string())
        .ok_or(MetadataError::MissingStorageUrn(index))?;

    let storage_urn = if ARWEAVE_FAILURE_SENTINELS
        .iter()
        .any(|sentinel| storage_urn.contains(sentinel))
    {
        String::new()
    } else {
        storage_urn.to_string()
    };

    Ok(DatumMetadata {
        fact_urn,
        storage_urn,
    })
}

fn is_tos_disclaimer(value: &MetadataValue) -> bool {
    value
        .as_string()
        .is_some_and(|s| TOS_DISCLAIMERS.contains(&s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharos_module_chain_index::types::MetadataPair;
    use std::collections::HashMap;

    fn string_value(s: &str) -> MetadataValue {
        MetadataValue {
            string: Some(s.to_string()),
            ..Default::default()
        }
    }

    fn int_value(i: i64) -> MetadataValue {
        MetadataValue {
            int: Some(i),
            ..Default::default()
        }
    }

    fn entry(fact_urn: &str, storage_urn: &str) -> MetadataValue {
        MetadataValue {
            map: Some(vec![
                MetadataPair {
                    k: int_value(0),
                    v: string_value(fact_urn),
                },
                MetadataPair {
                    k: int_value(1),
                    v: string_value(storage_urn),
                },
            ]),
            ..Default::default()
        }
    }

    fn envelope(list: Vec<MetadataValue>) -> Vec<MetadataEnvelope> {
        let mut schema = HashMap::new();
        schema.insert(
            ORCFAX_METADATA_LABEL.to_string(),
            MetadataValue {
                list: Some(list),
                ..Default::default()
            },
        );
        vec![MetadataEnvelope {
            hash: "metahash".to_string(),
            raw: None,
            schema,
        }]
    }

    #[test]
    fn skips_tos_head_and_pairs_outputs_in_order() {
        let envelopes = envelope(vec![
            string_value("Use oracle data at your own risk: https://orcfax.io/tos/"),
            entry("urn:orcfax:fact-0", "urn:orcfax:store-0"),
            entry("urn:orcfax:fact-1", "urn:orcfax:store-1"),
        ]);

        let decoded = decode_fact_metadata(&envelopes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].fact_urn, "urn:orcfax:fact-0");
        assert_eq!(decoded[1].fact_urn, "urn:orcfax:fact-1");
    }

    #[test]
    fn works_without_a_tos_head() {
        let envelopes = envelope(vec![entry("urn:orcfax:fact-0", "urn:orcfax:store-0")]);
        let decoded = decode_fact_metadata(&envelopes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].storage_urn, "urn:orcfax:store-0");
    }

    #[test]
    fn arweave_failure_sentinels_blank_the_storage_urn() {
        let envelopes = envelope(vec![
            entry("urn:orcfax:fact-0", "error: arweave tx not created"),
            entry(
                "urn:orcfax:fact-1",
                "send to Arkly feature is not currently enabled",
            ),
            entry("urn:orcfax:fact-2", "urn:orcfax:store-2"),
        ]);

        let decoded = decode_fact_metadata(&envelopes).unwrap();
        assert_eq!(decoded[0].storage_urn, "");
        assert_eq!(decoded[1].storage_urn, "");
        assert_eq!(decoded[2].storage_urn, "urn:orcfax:store-2");
    }

    #[test]
    fn missing_label_is_an_error() {
        let envelopes = vec![MetadataEnvelope {
            hash: "metahash".to_string(),
            raw: None,
            schema: HashMap::new(),
        }];
        assert!(matches!(
            decode_fact_metadata(&envelopes),
            Err(MetadataError::MissingLabel)
        ));
    }

    #[test]
    fn entry_without_urns_is_an_error() {
        let envelopes = envelope(vec![MetadataValue {
            map: Some(vec![]),
            ..Default::default()
        }]);
        assert!(matches!(
            decode_fact_metadata(&envelopes),
            Err(MetadataError::MissingFactUrn(0))
        ));
    }
}
