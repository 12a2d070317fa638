//! Archival package schemas.
//!
//! Packages carry one validation file (the publishing node and the
//! recorded collection event) and one message file per price source. The
//! shapes are tolerant: only the consumed fields are modeled, unknown
//! fields are ignored.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Marks a source fed from a central exchange API
pub const CEX_ADDITIONAL_TYPE: &str = "Central Exchange Data";

/// Extracts the source token out of a message file name, e.g.
/// "message-kraken-2024-01-01T00.00.00Z.json" -> "kraken"
static SOURCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-([\w]+?)(?:\.tick_|-\d{4}-\d{2}-\d{2}T)").expect("source name regex compiles")
});

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationFile {
    #[serde(rename = "additionalType", default)]
    pub additional_type: Vec<ValidationAdditionalType>,
    #[serde(rename = "isBasedOn")]
    pub is_based_on: ValidationBasis,
    pub contributor: Contributor,
}

/// The node whose publication this package validates
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationBasis {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contributor {
    pub name: String,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub geo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationAdditionalType {
    #[serde(rename = "recordedIn")]
    pub recorded_in: RecordedIn,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedIn {
    pub description: RecordDescription,
    #[serde(rename = "hasPart", default)]
    pub has_part: Vec<RecordPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordDescription {
    pub sha256: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordPart {
    pub text: String,
}

/// One per-source collection message
#[derive(Debug, Clone, Deserialize)]
pub struct FactSourceMessage {
    #[serde(rename = "isBasedOn")]
    pub is_based_on: MessageBasis,
    pub sender: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBasis {
    #[serde(rename = "additionalType", default)]
    pub additional_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn source_name_token(filename: &str) -> Option<String> {
    SOURCE_NAME_RE
        .captures(filename)
        .map(|captures| captures[1].to_string())
}

/// Collapse an https sender to "{protocol}//{host}"
pub fn normalize_sender(sender: &str) -> String {
    match sender.strip_prefix("https://") {
        Some(rest) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("https://{host}")
        }
        None => sender.to_string(),
    }
}
