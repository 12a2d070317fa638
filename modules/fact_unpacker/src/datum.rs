//! CBOR decoding of oracle currency-pair datums.
//!
//! A published datum is a Plutus constructor (CBOR tag 121) wrapping a
//! 2-tuple `[[feed_id, validation_ts_ms, [numerator, denominator]],
//! signature_group]`. Tags are transparent wrappers: each tagged element
//! decodes to its payload.

use chrono::{DateTime, TimeZone, Utc};
use minicbor::data::Type;
use minicbor::Decoder;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// "type/name-name/version", e.g. "CER/ADA-USD/3"
static FEED_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/]+/[^/]+-[^/]+/[^/]+$").expect("feed id regex compiles"));

/// Values below this threshold keep more rounding digits
const SMALL_VALUE_THRESHOLD: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum DatumError {
    #[error("datum is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("datum CBOR not understood: {0}")]
    Cbor(#[from] minicbor::decode::Error),

    #[error("datum shape not understood: {0}")]
    Shape(&'static str),

    #[error("feed id not understood: {0}")]
    BadFeedId(String),

    #[error("validation timestamp out of range: {0}")]
    BadTimestamp(u64),

    #[error("datum carries a zero denominator")]
    ZeroDenominator,
}

/// A decoded oracle publication datum
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyPairDatum {
    pub feed_id: String,
    pub feed_type: String,
    pub feed_name: String,
    pub feed_version: String,
    pub base_ticker: String,
    pub quote_ticker: String,
    pub validation_date: DateTime<Utc>,
    /// Raw first element of the outermost decoded sequence, hex encoded
    pub datum_hash: String,
    /// Ratio value after display rounding
    pub value: f64,
    pub inverse_value: f64,
}

/// Decode a hex-encoded currency-pair datum
pub fn decode_currency_pair_datum(hex_datum: &str) -> Result<CurrencyPairDatum, DatumError> {
    let bytes = hex::decode(hex_datum)?;
    let mut d = Decoder::new(&bytes);

    unwrap_tags(&mut d)?;
    let outer = d.array()?;
    if outer == Some(0) {
        return Err(DatumError::Shape("outer sequence is empty"));
    }

    // The first element is the statement group; its raw CBOR span doubles
    // as the datum hash sentinel.
    let start = d.position();
    let mut probe = d.clone();
    probe.skip()?;
    let datum_hash = hex::encode(&bytes[start..probe.position()]);

    unwrap_tags(&mut d)?;
    let statement = d.array()?;
    if matches!(statement, Some(n) if n < 3) {
        return Err(DatumError::Shape("statement group has fewer than 3 elements"));
    }

    let feed_id = decode_text(&mut d)?;
    if !FEED_ID_RE.is_match(&feed_id) {
        return Err(DatumError::BadFeedId(feed_id));
    }

    unwrap_tags(&mut d)?;
    let validation_ts = d.u64()?;
    let validation_date = Utc
        .timestamp_millis_opt(validation_ts as i64)
        .single()
        .ok_or(DatumError::BadTimestamp(validation_ts))?;

    unwrap_tags(&mut d)?;
    let ratio = d.array()?;
    if matches!(ratio, Some(n) if n < 2) {
        return Err(DatumError::Shape("ratio group has fewer than 2 elements"));
    }
    unwrap_tags(&mut d)?;
    let numerator = d.u64()?;
    unwrap_tags(&mut d)?;
    let denominator = d.u64()?;
    if denominator == 0 {
        return Err(DatumError::ZeroDenominator);
    }

    let mut parts = feed_id.split('/');
    let feed_type = parts.next().unwrap_or_default().to_string();
    let feed_name = parts.next().unwrap_or_default().to_string();
    let feed_version = parts.next().unwrap_or_default().to_string();
    let (base_ticker, quote_ticker) = feed_name
        .split_once('-')
        .map(|(base, quote)| (base.to_string(), quote.to_string()))
        .ok_or_else(|| DatumError::BadFeedId(feed_id.clone()))?;

    let value = format_value(numerator as f64 / denominator as f64);

    Ok(CurrencyPairDatum {
        feed_id,
        feed_type,
        feed_name,
        feed_version,
        base_ticker,
        quote_ticker,
        validation_date,
        datum_hash,
        value,
        inverse_value: 1.0 / value,
    })
}

/// Decode a pointer datum to the hex policy id it carries
pub fn decode_policy_id(hex_datum: &str) -> Result<String, DatumError> {
    let bytes = hex::decode(hex_datum)?;
    let mut d = Decoder::new(&bytes);
    unwrap_tags(&mut d)?;
    Ok(hex::encode(d.bytes()?))
}

/// Round the raw ratio: 10 digits below the small-value threshold, 6
/// digits otherwise. The explorer relies on these exact boundaries.
pub fn format_value(value: f64) -> f64 {
    if value < SMALL_VALUE_THRESHOLD {
        round_to(value, 10)
    } else {
        round_to(value, 6)
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Tags are transparent wrappers over their payload
fn unwrap_tags(d: &mut Decoder) -> Result<(), minicbor::decode::Error> {
    while d.datatype()? == Type::Tag {
        d.tag()?;
    }
    Ok(())
}

/// Feed ids arrive as byte strings; tolerate text strings too
fn decode_text(d: &mut Decoder) -> Result<String, DatumError> {
    unwrap_tags(d)?;
    match d.datatype()? {
        Type::Bytes => String::from_utf8(d.bytes()?.to_vec())
            .map_err(|_| DatumError::Shape("feed id is not UTF-8")),
        Type::String => Ok(d.str()?.to_string()),
        _ => Err(DatumError::Shape("feed id is neither bytes nor text")),
    }
}
