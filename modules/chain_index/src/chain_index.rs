//! Pharos chain-index client module
//!
//! Issues `matches`, `datums` and `metadata` requests against a Kupo-style
//! chain-index service, honoring `If-None-Match` on matches and capturing
//! the `etag` and `x-most-recent-checkpoint` response headers that drive
//! incremental sync and rollback detection.

pub mod types;

use pharos_common::Checkpoint;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use types::{KupoMatch, MetadataEnvelope};

const REQUEST_TIMEOUT: u64 = 60;
const CHECKPOINT_HEADER: &str = "x-most-recent-checkpoint";

#[derive(Debug, Error)]
pub enum ChainIndexError {
    #[error("chain-index request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chain-index returned HTTP status {0} for {1}")]
    Status(StatusCode, String),

    #[error("chain-index 200 response missing required header {0}")]
    MissingHeader(&'static str),

    #[error("chain-index header {0} not understood: {1}")]
    BadHeader(&'static str, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrder {
    OldestFirst,
    MostRecentFirst,
}

impl MatchOrder {
    fn as_str(&self) -> &'static str {
        match self {
            MatchOrder::OldestFirst => "oldest_first",
            MatchOrder::MostRecentFirst => "most_recent_first",
        }
    }
}

/// Query options of `/matches/{pattern}`
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub order: Option<MatchOrder>,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
    pub unspent: bool,
}

impl MatchQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(order) = &self.order {
            params.push(("order", order.as_str().to_string()));
        }
        if let Some(after) = self.created_after {
            params.push(("created_after", after.to_string()));
        }
        if let Some(before) = self.created_before {
            params.push(("created_before", before.to_string()));
        }
        if self.unspent {
            params.push(("unspent", String::new()));
        }
        params
    }
}

/// A 200 matches response: the body plus its checkpoint headers
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPage {
    pub matches: Vec<KupoMatch>,
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchesResponse {
    /// 304 against the supplied `If-None-Match` block hash
    NotModified,
    Page(MatchPage),
}

#[derive(Debug, Deserialize)]
struct DatumResponse {
    datum: Option<String>,
}

pub struct ChainIndexClient {
    client: Client,
    base_url: String,
}

impl ChainIndexClient {
    pub fn new(base_url: &str) -> Result<Self, ChainIndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch UTxO matches for a policy pattern. `if_none_match` carries the
    /// last seen block hash; an unchanged chain yields `NotModified`.
    pub async fn matches(
        &self,
        pattern: &str,
        query: &MatchQuery,
        if_none_match: Option<&str>,
    ) -> Result<MatchesResponse, ChainIndexError> {
        let url = format!("{}/matches/{}", self.base_url, pattern);
        let mut request = self.client.get(&url).query(&query.params());
        if let Some(block_hash) = if_none_match {
            request = request.header(header::IF_NONE_MATCH, block_hash);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => {
                debug!(pattern, "matches not modified");
                Ok(MatchesResponse::NotModified)
            }
            StatusCode::OK => {
                let checkpoint = Self::checkpoint_headers(&response)?;
                let matches: Vec<KupoMatch> = response.json().await?;
                debug!(pattern, count = matches.len(), slot = checkpoint.slot, "fetched matches");
                Ok(MatchesResponse::Page(MatchPage { matches, checkpoint }))
            }
            status => Err(ChainIndexError::Status(status, url)),
        }
    }

    /// Resolve a datum hash to its hex-encoded CBOR body, when known
    pub async fn datum(&self, datum_hash: &str) -> Result<Option<String>, ChainIndexError> {
        let url = format!("{}/datums/{}", self.base_url, datum_hash);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ChainIndexError::Status(response.status(), url));
        }
        let body: DatumResponse = response.json().await?;
        Ok(body.datum)
    }

    /// Fetch a transaction's metadata at a slot
    pub async fn metadata(
        &self,
        slot: u64,
        transaction_id: &str,
    ) -> Result<Vec<MetadataEnvelope>, ChainIndexError> {
        let url = format!("{}/metadata/{}", self.base_url, slot);
        let response = self
            .client
            .get(&url)
            .query(&[("transaction_id", transaction_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChainIndexError::Status(response.status(), url));
        }
        Ok(response.json().await?)
    }

    /// Both checkpoint headers are required on any 200 matches response
    fn checkpoint_headers(response: &reqwest::Response) -> Result<Checkpoint, ChainIndexError> {
        let block_hash = response
            .headers()
            .get(header::ETAG)
            .ok_or(ChainIndexError::MissingHeader("etag"))?
            .to_str()
            .map_err(|e| ChainIndexError::BadHeader("etag", e.to_string()))?
            .trim_matches('"')
            .to_string();

        let checkpoint_raw = response
            .headers()
            .get(CHECKPOINT_HEADER)
            .ok_or(ChainIndexError::MissingHeader(CHECKPOINT_HEADER))?
            .to_str()
            .map_err(|e| ChainIndexError::BadHeader(CHECKPOINT_HEADER, e.to_string()))?;
        let slot: u64 = checkpoint_raw
            .parse()
            .map_err(|_| ChainIndexError::BadHeader(CHECKPOINT_HEADER, checkpoint_raw.to_string()))?;

        Ok(Checkpoint { slot, block_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn match_body() -> serde_json::Value {
        json!([{
            "transaction_index": 0,
            "transaction_id": "tx1",
            "output_index": 0,
            "address": "addr1qxy",
            "value": { "coins": 1_500_000, "assets": { "policy.token": 1 } },
            "datum_hash": "deadbeef",
            "datum_type": "hash",
            "script_hash": null,
            "created_at": { "slot_no": 120, "header_hash": "block120" },
            "spent_at": null,
        }])
    }

    #[tokio::test]
    async fn matches_parses_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches/policy1.*"))
            .and(query_param("order", "oldest_first"))
            .and(query_param("created_after", "100"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "block120")
                    .insert_header("x-most-recent-checkpoint", "125")
                    .set_body_json(match_body()),
            )
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        let query = MatchQuery {
            order: Some(MatchOrder::OldestFirst),
            created_after: Some(100),
            ..Default::default()
        };
        let response = client.matches("policy1.*", &query, None).await.unwrap();

        let MatchesResponse::Page(page) = response else {
            panic!("expected a page");
        };
        assert_eq!(page.checkpoint.slot, 125);
        assert_eq!(page.checkpoint.block_hash, "block120");
        assert_eq!(page.matches.len(), 1);
        assert_eq!(page.matches[0].transaction_id, "tx1");
        assert_eq!(page.matches[0].created_at.slot_no, 120);
        assert_eq!(page.matches[0].value.coins, 1_500_000);
    }

    #[tokio::test]
    async fn matches_returns_not_modified_on_304() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches/policy1.*"))
            .and(header("if-none-match", "abcd"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        let response = client
            .matches("policy1.*", &MatchQuery::default(), Some("abcd"))
            .await
            .unwrap();
        assert_eq!(response, MatchesResponse::NotModified);
    }

    #[tokio::test]
    async fn matches_requires_checkpoint_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches/policy1.*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(match_body()))
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        let result = client.matches("policy1.*", &MatchQuery::default(), None).await;
        assert!(matches!(result, Err(ChainIndexError::MissingHeader(_))));
    }

    #[tokio::test]
    async fn datum_resolves_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datums/deadbeef"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "datum": null })))
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        assert_eq!(client.datum("deadbeef").await.unwrap(), None);
    }

    #[tokio::test]
    async fn metadata_parses_label_schema() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/120"))
            .and(query_param("transaction_id", "tx1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "hash": "metahash",
                "raw": null,
                "schema": {
                    "1226": { "list": [
                        { "map": [
                            { "k": { "int": 0 }, "v": { "string": "urn:orcfax:fact" } },
                            { "k": { "int": 1 }, "v": { "string": "urn:orcfax:store" } },
                        ]},
                    ]},
                },
            }])))
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        let envelopes = client.metadata(120, "tx1").await.unwrap();
        assert_eq!(envelopes.len(), 1);
        let label = envelopes[0].schema.get("1226").unwrap();
        let list = label.list.as_ref().unwrap();
        assert_eq!(list.len(), 1);
        let map = list[0].map.as_ref().unwrap();
        assert_eq!(map[1].v.as_string(), Some("urn:orcfax:store"));
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datums/deadbeef"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ChainIndexClient::new(&server.uri()).unwrap();
        assert!(matches!(
            client.datum("deadbeef").await,
            Err(ChainIndexError::Status(StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
    }
}
