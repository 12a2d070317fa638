//! Pharos fact unpacker module
//!
//! Decodes CBOR oracle datums and label-1226 transaction metadata into the
//! typed components of a fact statement.

pub mod datum;
pub mod metadata;

pub use datum::{decode_currency_pair_datum, decode_policy_id, CurrencyPairDatum, DatumError};
pub use metadata::{decode_fact_metadata, DatumMetadata, MetadataError};
