//! Fetching and extraction of archival packages.
//!
//! A package is a gzipped POSIX tar bundle pinned on permanent storage.
//! Only `.json` and `.txt` entries are of interest; everything else is
//! tolerated and ignored.

use flate2::read::GzDecoder;
use reqwest::{header, Client, StatusCode};
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const FETCH_TIMEOUT: u64 = 120;

/// Storage URNs lead with a fixed-width scheme prefix ("urn:arweave:");
/// the archive location is everything after it.
const STORAGE_URN_PREFIX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("storage URN too short to locate an archive: {0}")]
    BadStorageUrn(String),

    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("archive endpoint returned HTTP status {0}")]
    Status(StatusCode),

    #[error("archive served with content-type {0:?}, expected a gzipped tar")]
    BadContentType(String),

    #[error("archive extraction failed: {0}")]
    Extract(#[from] std::io::Error),

    #[error("archive entry {0} is not valid JSON: {1}")]
    BadJson(String, serde_json::Error),

    #[error("archive has no validation file")]
    MissingValidation,

    #[error("validation file not understood: {0}")]
    BadValidation(serde_json::Error),

    #[error("validation file has no recorded collection event")]
    MissingRecordedEvent,

    #[error("message file {0} not understood: {1}")]
    BadMessage(String, serde_json::Error),

    #[error("message file name carries no source token: {0}")]
    BadMessageName(String),

    #[error("collection date not understood: {0}")]
    BadCollectionDate(String),
}

/// One extracted file of interest
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Basename within the bundle
    pub name: String,
    /// Parsed body of a `.json` entry
    pub json: Option<serde_json::Value>,
    /// Body of a `.txt` entry
    pub text: Option<String>,
}

pub struct ArchiveFetcher {
    client: Client,
    gateway: String,
}

impl ArchiveFetcher {
    pub fn new(gateway: &str) -> Result<Self, ArchiveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT))
            .build()?;
        let mut gateway = gateway.to_string();
        if !gateway.ends_with('/') {
            gateway.push('/');
        }
        Ok(Self { client, gateway })
    }

    /// Download and extract the package named by a storage URN
    pub async fn fetch(&self, storage_urn: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let location = storage_urn
            .get(STORAGE_URN_PREFIX_LEN..)
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| ArchiveError::BadStorageUrn(storage_urn.to_string()))?;
        let url = format!("{}{}", self.gateway, location);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ArchiveError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("x-tar") && !content_type.contains("gzip") {
            return Err(ArchiveError::BadContentType(content_type));
        }

        let bytes = response.bytes().await?;
        debug!(%url, size = bytes.len(), "fetched archival package");
        extract(&bytes)
    }
}

/// Gunzip and untar a package body, collecting `.json` and `.txt` entries
/// by basename. Directory entries are ignored.
pub fn extract(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path()?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        if name.ends_with(".json") {
            let mut body = String::new();
            entry.read_to_string(&mut body)?;
            let json = serde_json::from_str(&body)
                .map_err(|e| ArchiveError::BadJson(name.clone(), e))?;
            entries.push(ArchiveEntry {
                name,
                json: Some(json),
                text: None,
            });
        } else if name.ends_with(".txt") {
            let mut body = String::new();
            entry.read_to_string(&mut body)?;
            entries.push(ArchiveEntry {
                name,
                json: None,
                text: Some(body),
            });
        }
    }

    Ok(entries)
}
