//! HTTP client for the external record store.
//!
//! The store exposes a record API: operator token auth, filtered paged
//! list queries and per-record CRUD per collection. Uniqueness conflicts
//! surface as a 400 carrying a "validation_not_unique" code, which
//! `insert_fact` maps to [`InsertOutcome::Duplicate`].

use super::{Datastore, InsertOutcome};
use crate::types::{Asset, Feed, FactStatement, Network, Node, Policy, Source};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const REQUEST_TIMEOUT: u64 = 30;
const PAGE_SIZE: u32 = 500;
const NOT_UNIQUE_CODE: &str = "validation_not_unique";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("record store authentication failed: HTTP status {0}")]
    AuthFailed(StatusCode),

    #[error("record does not serialize: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record store returned {status} for {collection}: {body}")]
    Rejected {
        collection: String,
        status: StatusCode,
        body: String,
    },
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    page: u32,
    #[serde(rename = "totalPages")]
    total_pages: u32,
    items: Vec<T>,
}

#[derive(Clone, Copy)]
enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

pub struct RecordApiStore {
    client: Client,
    base_url: String,
    email: String,
    password: String,
    token: RwLock<String>,
}

impl RecordApiStore {
    /// Connect and authenticate against the record store at `host`
    pub async fn connect(host: &str, email: &str, password: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .build()?;

        let store = Self {
            client,
            base_url: host.trim_end_matches('/').to_string(),
            email: email.to_string(),
            password: password.to_string(),
            token: RwLock::new(String::new()),
        };
        store.authenticate().await?;
        Ok(store)
    }

    async fn authenticate(&self) -> Result<(), StoreError> {
        let url = format!("{}/api/admins/auth-with-password", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "identity": self.email,
                "password": self.password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::AuthFailed(response.status()));
        }

        let auth: AuthResponse = response.json().await?;
        *self.token.write().await = auth.token;
        debug!("authenticated against record store");
        Ok(())
    }

    /// Issue a request, re-authenticating once on a stale token
    async fn send(
        &self,
        verb: Verb,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let response = self.send_once(verb, path, query, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        self.authenticate().await?;
        self.send_once(verb, path, query, body).await
    }

    async fn send_once(
        &self,
        verb: Verb,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let token = self.token.read().await.clone();
        let url = format!("{}{}", self.base_url, path);
        let mut request = match verb {
            Verb::Get => self.client.get(&url),
            Verb::Post => self.client.post(&url),
            Verb::Patch => self.client.patch(&url),
            Verb::Delete => self.client.delete(&url),
        };
        request = request.query(query).header("Authorization", token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn rejected(collection: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::Rejected {
            collection: collection.to_string(),
            status,
            body,
        }
    }

    /// Fetch every record of a collection matching `filter`, page by page
    async fn list_all<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Option<String>,
        sort: Option<&str>,
    ) -> Result<Vec<T>, StoreError> {
        let path = format!("/api/collections/{collection}/records");
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("page", page.to_string()),
                ("perPage", PAGE_SIZE.to_string()),
            ];
            if let Some(filter) = &filter {
                query.push(("filter", filter.clone()));
            }
            if let Some(sort) = sort {
                query.push(("sort", sort.to_string()));
            }

            let response = self.send(Verb::Get, &path, &query, None).await?;
            if !response.status().is_success() {
                return Err(Self::rejected(collection, response).await);
            }
            let mut parsed: ListPage<T> = response.json().await?;
            items.append(&mut parsed.items);

            if parsed.page >= parsed.total_pages {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// Fetch the first record matching `filter` under `sort`
    async fn first<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: String,
        sort: &str,
    ) -> Result<Option<T>, StoreError> {
        let path = format!("/api/collections/{collection}/records");
        let query: Vec<(&str, String)> = vec![
            ("page", "1".to_string()),
            ("perPage", "1".to_string()),
            ("filter", filter),
            ("sort", sort.to_string()),
        ];
        let response = self.send(Verb::Get, &path, &query, None).await?;
        if !response.status().is_success() {
            return Err(Self::rejected(collection, response).await);
        }
        let parsed: ListPage<T> = response.json().await?;
        Ok(parsed.items.into_iter().next())
    }

    async fn create<T: Serialize + DeserializeOwned>(
        &self,
        collection: &str,
        record: &T,
    ) -> Result<T, StoreError> {
        let path = format!("/api/collections/{collection}/records");
        let body = serde_json::to_value(record)?;
        let response = self.send(Verb::Post, &path, &[], Some(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::rejected(collection, response).await);
        }
        Ok(response.json().await?)
    }

    async fn update<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let path = format!("/api/collections/{collection}/records/{id}");
        let body = serde_json::to_value(record)?;
        let response = self.send(Verb::Patch, &path, &[], Some(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::rejected(collection, response).await);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let path = format!("/api/collections/{collection}/records/{id}");
        let response = self.send(Verb::Delete, &path, &[], None).await?;
        if !response.status().is_success() {
            return Err(Self::rejected(collection, response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for RecordApiStore {
    async fn list_networks(&self) -> Result<Vec<Network>> {
        Ok(self.list_all("networks", None, None).await?)
    }

    async fn create_network(&self, network: &Network) -> Result<Network> {
        Ok(self.create("networks", network).await?)
    }

    async fn update_network(&self, network: &Network) -> Result<()> {
        Ok(self.update("networks", &network.id, network).await?)
    }

    async fn list_policies(&self, network_id: &str) -> Result<Vec<Policy>> {
        Ok(self
            .list_all(
                "policies",
                Some(format!("network='{network_id}'")),
                Some("starting_slot"),
            )
            .await?)
    }

    async fn create_policy(&self, policy: &Policy) -> Result<Policy> {
        Ok(self.create("policies", policy).await?)
    }

    async fn list_feeds(&self, network_id: &str) -> Result<Vec<Feed>> {
        Ok(self
            .list_all("feeds", Some(format!("network='{network_id}'")), None)
            .await?)
    }

    async fn create_feed(&self, feed: &Feed) -> Result<Feed> {
        Ok(self.create("feeds", feed).await?)
    }

    async fn update_feed(&self, feed: &Feed) -> Result<()> {
        Ok(self.update("feeds", &feed.id, feed).await?)
    }

    async fn list_assets(&self) -> Result<Vec<Asset>> {
        Ok(self.list_all("assets", None, None).await?)
    }

    async fn create_asset(&self, asset: &Asset) -> Result<Asset> {
        Ok(self.create("assets", asset).await?)
    }

    async fn insert_fact(&self, fact: &FactStatement) -> Result<InsertOutcome> {
        match self.create::<FactStatement>("facts", fact).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(StoreError::Rejected { status, body, .. })
                if status == StatusCode::BAD_REQUEST && body.contains(NOT_UNIQUE_CODE) =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_fact(&self, fact: &FactStatement) -> Result<()> {
        Ok(self.update("facts", &fact.id, fact).await?)
    }

    async fn delete_facts_with_slot_greater_than(
        &self,
        network_id: &str,
        slot: u64,
    ) -> Result<u64> {
        let doomed: Vec<FactStatement> = self
            .list_all(
                "facts",
                Some(format!("network='{network_id}' && slot>{slot}")),
                None,
            )
            .await?;
        let mut removed = 0u64;
        for fact in &doomed {
            self.delete("facts", &fact.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn last_indexed_fact(&self, network_id: &str) -> Result<Option<FactStatement>> {
        Ok(self
            .first("facts", format!("network='{network_id}'"), "-slot")
            .await?)
    }

    async fn list_unarchived_facts(&self, network_id: &str) -> Result<Vec<FactStatement>> {
        Ok(self
            .list_all(
                "facts",
                Some(format!(
                    "network='{network_id}' && is_archive_indexed=false && storage_urn!=''"
                )),
                None,
            )
            .await?)
    }

    async fn list_nodes(&self, network_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .list_all("nodes", Some(format!("network='{network_id}'")), None)
            .await?)
    }

    async fn create_node(&self, node: &Node) -> Result<Node> {
        Ok(self.create("nodes", node).await?)
    }

    async fn list_sources(&self, network_id: &str) -> Result<Vec<Source>> {
        Ok(self
            .list_all("sources", Some(format!("network='{network_id}'")), None)
            .await?)
    }

    async fn create_source(&self, source: &Source) -> Result<Source> {
        Ok(self.create("sources", source).await?)
    }

    async fn update_source(&self, source: &Source) -> Result<()> {
        Ok(self.update("sources", &source.id, source).await?)
    }
}
