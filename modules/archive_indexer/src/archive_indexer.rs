//! Pharos archive indexer module
//!
//! Resolves fact archival packages from the permanent-storage gateway:
//! fetches each gzipped tar bundle, derives node and source records from
//! its validation and message files, and patches the fact statement. At
//! most five packages resolve concurrently; node and source caches are
//! owned by the applying task, which serializes all store updates.

pub mod bundle;
pub mod package;

use anyhow::Result;
use bundle::{ArchiveError, ArchiveFetcher};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use package::{
    normalize_sender, source_name_token, FactSourceMessage, ValidationFile, CEX_ADDITIONAL_TYPE,
};
use pharos_common::{
    Datastore, FactStatement, Network, Node, NodeType, Source, SourceStatus, SourceType,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

const MAX_CONCURRENT_FACTS: usize = 5;
const VALIDATION_MARKER: &str = "validation-";
const MESSAGE_MARKER: &str = "message-";

/// Counters of one archive pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub archived: u64,
    pub failed: u64,
}

/// A resolved package, ready to apply against the store
#[derive(Debug, Clone)]
struct ArchivePackage {
    node: NodeDraft,
    sources: Vec<SourceDraft>,
    content_signature: String,
    collection_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct NodeDraft {
    urn: String,
    name: String,
    locality: Option<String>,
    region: Option<String>,
    geo: Option<String>,
}

#[derive(Debug, Clone)]
struct SourceDraft {
    name: String,
    source_type: SourceType,
    sender: String,
    recipient: String,
}

pub struct ArchiveIndexer {
    fetcher: ArchiveFetcher,
    store: Arc<dyn Datastore>,
}

impl ArchiveIndexer {
    pub fn new(gateway: &str, store: Arc<dyn Datastore>) -> Result<Self, ArchiveError> {
        Ok(Self {
            fetcher: ArchiveFetcher::new(gateway)?,
            store,
        })
    }

    /// Process every unarchived fact of a network. A failing fact is
    /// logged and left eligible for the next tick.
    pub async fn run(&self, network: &Network) -> Result<ArchiveOutcome> {
        let facts = self.store.list_unarchived_facts(&network.id).await?;
        if facts.is_empty() {
            return Ok(ArchiveOutcome::default());
        }
        info!(network = %network.name, count = facts.len(), "resolving archival packages");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FACTS));
        let resolutions = join_all(facts.iter().map(|fact| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                (fact, self.resolve_package(fact).await)
            }
        }))
        .await;

        let mut nodes = self.store.list_nodes(&network.id).await?;
        let mut sources = self.store.list_sources(&network.id).await?;
        let mut outcome = ArchiveOutcome::default();

        for (fact, resolution) in resolutions {
            let applied = match resolution {
                Ok(package) => {
                    self.apply(network, fact, package, &mut nodes, &mut sources).await
                }
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(()) => outcome.archived += 1,
                Err(e) => {
                    error!(fact_urn = %fact.fact_urn, "archive indexing failed: {e:#}");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            network = %network.name,
            archived = outcome.archived,
            failed = outcome.failed,
            "archive pass complete"
        );
        Ok(outcome)
    }

    /// Fetch one fact's bundle and derive its node, sources and recorded
    /// collection event.
    async fn resolve_package(&self, fact: &FactStatement) -> Result<ArchivePackage, ArchiveError> {
        let entries = self.fetcher.fetch(&fact.storage_urn).await?;

        let validation_json = entries
            .iter()
            .find(|e| e.name.contains(VALIDATION_MARKER))
            .and_then(|e| e.json.clone())
            .ok_or(ArchiveError::MissingValidation)?;
        let validation: ValidationFile =
            serde_json::from_value(validation_json).map_err(ArchiveError::BadValidation)?;

        let recorded = validation
            .additional_type
            .first()
            .ok_or(ArchiveError::MissingRecordedEvent)?;
        let collection_text = recorded
            .recorded_in
            .has_part
            .first()
            .ok_or(ArchiveError::MissingRecordedEvent)?
            .text
            .clone();
        let collection_date = DateTime::parse_from_rfc3339(&collection_text)
            .map_err(|_| ArchiveError::BadCollectionDate(collection_text))?
            .with_timezone(&Utc);

        let mut drafts = Vec::new();
        for entry in entries.iter().filter(|e| e.name.contains(MESSAGE_MARKER)) {
            let Some(json) = entry.json.clone() else {
                continue;
            };
            let name = source_name_token(&entry.name)
                .ok_or_else(|| ArchiveError::BadMessageName(entry.name.clone()))?;
            let message: FactSourceMessage = serde_json::from_value(json)
                .map_err(|e| ArchiveError::BadMessage(entry.name.clone(), e))?;

            let source_type =
                if message.is_based_on.additional_type.as_deref() == Some(CEX_ADDITIONAL_TYPE) {
                    SourceType::CexApi
                } else {
                    SourceType::DexLp
                };
            drafts.push(SourceDraft {
                name,
                source_type,
                sender: normalize_sender(&message.sender),
                recipient: message.recipient,
            });
        }

        Ok(ArchivePackage {
            node: NodeDraft {
                urn: validation.is_based_on.identifier,
                name: validation.contributor.name,
                locality: validation.contributor.locality,
                region: validation.contributor.region,
                geo: validation.contributor.geo,
            },
            sources: drafts,
            content_signature: recorded.recorded_in.description.sha256.clone(),
            collection_date,
        })
    }

    /// Reconcile a resolved package against the node and source caches,
    /// then patch the fact.
    async fn apply(
        &self,
        network: &Network,
        fact: &FactStatement,
        package: ArchivePackage,
        nodes: &mut Vec<Node>,
        sources: &mut Vec<Source>,
    ) -> Result<()> {
        let node_id = self.ensure_node(network, &package.node, nodes).await?;

        let mut source_ids = Vec::new();
        for draft in &package.sources {
            let id = self.ensure_source(network, draft, sources).await?;
            if !source_ids.contains(&id) {
                source_ids.push(id);
            }
        }

        let mut patched = fact.clone();
        patched.content_signature = package.content_signature;
        patched.collection_date = Some(package.collection_date);
        patched.participating_nodes = vec![node_id];
        patched.sources = source_ids;
        patched.is_archive_indexed = true;
        self.store.update_fact(&patched).await
    }

    async fn ensure_node(
        &self,
        network: &Network,
        draft: &NodeDraft,
        nodes: &mut Vec<Node>,
    ) -> Result<String> {
        if let Some(node) = nodes.iter().find(|n| n.node_urn == draft.urn) {
            return Ok(node.id.clone());
        }
        let created = self
            .store
            .create_node(&Node {
                id: String::new(),
                network: network.id.clone(),
                node_urn: draft.urn.clone(),
                name: draft.name.clone(),
                status: "active".to_string(),
                node_type: NodeType::Federated,
                locality: draft.locality.clone(),
                region: draft.region.clone(),
                geo: draft.geo.clone(),
            })
            .await?;
        info!(node_urn = %created.node_urn, "created node");
        let id = created.id.clone();
        nodes.push(created);
        Ok(id)
    }

    /// Sources anchor on their recipient. A known sender reappearing with
    /// a new recipient retires the old record and carries its
    /// presentation fields onto the replacement.
    async fn ensure_source(
        &self,
        network: &Network,
        draft: &SourceDraft,
        sources: &mut Vec<Source>,
    ) -> Result<String> {
        if let Some(source) = sources.iter().find(|s| s.recipient == draft.recipient) {
            return Ok(source.id.clone());
        }

        let rotated = sources.iter().position(|s| {
            s.name == draft.name
                && s.source_type == draft.source_type
                && s.sender == draft.sender
                && s.recipient != draft.recipient
        });

        let mut source = Source {
            id: String::new(),
            network: network.id.clone(),
            name: draft.name.clone(),
            source_type: draft.source_type,
            sender: draft.sender.clone(),
            recipient: draft.recipient.clone(),
            status: SourceStatus::Active,
            website: String::new(),
            image_path: String::new(),
            background_color: String::new(),
        };

        if let Some(index) = rotated {
            let mut retired = sources[index].clone();
            retired.status = SourceStatus::Inactive;
            self.store.update_source(&retired).await?;
            info!(
                name = %retired.name,
                old_recipient = %retired.recipient,
                new_recipient = %draft.recipient,
                "source recipient rotated"
            );
            source.website = retired.website.clone();
            source.image_path = retired.image_path.clone();
            source.background_color = retired.background_color.clone();
            sources[index] = retired;
        }

        let created = self.store.create_source(&source).await?;
        let id = created.id.clone();
        sources.push(created);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pharos_common::MemoryStore;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bundle(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        encoder.finish().unwrap()
    }

    fn validation_json(node_urn: &str) -> String {
        json!({
            "@type": "Claim",
            "additionalType": [{
                "recordedIn": {
                    "description": { "sha256": "cafebabe" },
                    "hasPart": [{ "text": "2024-01-01T00:00:05Z" }],
                },
            }],
            "isBasedOn": { "identifier": node_urn, "name": "fact statement" },
            "contributor": { "name": "Orcfax validator", "locality": "Reykjavik" },
        })
        .to_string()
    }

    fn message_json(sender: &str, recipient: &str, cex: bool) -> String {
        json!({
            "isBasedOn": {
                "additionalType": if cex { "Central Exchange Data" } else { "Decentralized Exchange Data" },
                "name": "price collection",
            },
            "sender": sender,
            "recipient": recipient,
        })
        .to_string()
    }

    async fn mock_archive(server: &MockServer, location: &str, body: Vec<u8>, content_type: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{location}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(server)
            .await;
    }

    async fn seeded(server: &MockServer) -> (Arc<dyn Datastore>, Network) {
        let store: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
        let network = store
            .create_network(&Network {
                id: String::new(),
                name: "Mainnet".to_string(),
                fact_statement_pointer: "pointer".to_string(),
                script_token: "token".to_string(),
                chain_index_base_url: "http://unused".to_string(),
                active_feeds_url: "http://unused".to_string(),
                zero_time: 1_596_059_091_000,
                zero_slot: 4_492_800,
                slot_length: 1_000,
                last_block_hash: String::new(),
                last_checkpoint_slot: 0,
                is_enabled: true,
                track_archives: true,
                ignore_policies: vec![],
            })
            .await
            .unwrap();
        let _ = server;
        (store, network)
    }

    async fn seed_fact(
        store: &Arc<dyn Datastore>,
        network: &Network,
        urn: &str,
        storage_urn: &str,
    ) -> FactStatement {
        let fact = FactStatement {
            id: String::new(),
            network: network.id.clone(),
            feed: "feed1".to_string(),
            policy: "pol1".to_string(),
            fact_urn: urn.to_string(),
            storage_urn: storage_urn.to_string(),
            transaction_id: "tx".to_string(),
            block_hash: "block".to_string(),
            slot: 100,
            address: "addr1qxy".to_string(),
            output_index: 0,
            statement_hash: "hash".to_string(),
            value: 0.5,
            value_inverse: 2.0,
            publication_date: Utc::now(),
            validation_date: Utc::now(),
            publication_cost: 0.5,
            datum_hash: "datum".to_string(),
            is_archive_indexed: false,
            content_signature: String::new(),
            collection_date: None,
            participating_nodes: vec![],
            sources: vec![],
        };
        store.insert_fact(&fact).await.unwrap();
        store.list_unarchived_facts(&network.id).await.unwrap().pop().unwrap()
    }

    #[tokio::test]
    async fn archives_a_fact_with_node_and_source() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:arweave:bundle1").await;

        let body = bundle(&[
            (
                "pkg/validation-urn_orcfax_f1.json",
                &validation_json("urn:orcfax:node-1"),
            ),
            (
                "pkg/message-kraken-2024-01-01T00.00.00Z.json",
                &message_json("https://api.kraken.com/0/public/Ticker", "R1", true),
            ),
            ("pkg/notes.txt", "collector log"),
            ("pkg/proof.cbor", "ignored"),
        ]);
        mock_archive(&server, "bundle1", body, "application/x-tar").await;

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome { archived: 1, failed: 0 });

        let nodes = store.list_nodes(&network.id).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_urn, "urn:orcfax:node-1");
        assert_eq!(nodes[0].node_type, NodeType::Federated);
        assert_eq!(nodes[0].status, "active");
        assert_eq!(nodes[0].locality.as_deref(), Some("Reykjavik"));

        let sources = store.list_sources(&network.id).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "kraken");
        assert_eq!(sources[0].source_type, SourceType::CexApi);
        assert_eq!(sources[0].sender, "https://api.kraken.com");
        assert_eq!(sources[0].recipient, "R1");

        // The fact is patched and no longer eligible
        assert!(store.list_unarchived_facts(&network.id).await.unwrap().is_empty());
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome::default());
    }

    #[tokio::test]
    async fn sender_reuse_with_new_recipient_rotates_the_source() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:arweave:bundle1").await;

        store
            .create_source(&Source {
                id: String::new(),
                network: network.id.clone(),
                name: "kraken".to_string(),
                source_type: SourceType::CexApi,
                sender: "https://api.kraken.com".to_string(),
                recipient: "R1".to_string(),
                status: SourceStatus::Active,
                website: "https://kraken.com".to_string(),
                image_path: "/img/kraken.png".to_string(),
                background_color: "#5741d9".to_string(),
            })
            .await
            .unwrap();

        let body = bundle(&[
            (
                "pkg/validation-urn_orcfax_f1.json",
                &validation_json("urn:orcfax:node-1"),
            ),
            (
                "pkg/message-kraken-2024-01-01T00.00.00Z.json",
                &message_json("https://api.kraken.com/whatever", "R2", true),
            ),
        ]);
        mock_archive(&server, "bundle1", body, "application/gzip").await;

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        indexer.run(&network).await.unwrap();

        let sources = store.list_sources(&network.id).await.unwrap();
        assert_eq!(sources.len(), 2);
        let old = sources.iter().find(|s| s.recipient == "R1").unwrap();
        let new = sources.iter().find(|s| s.recipient == "R2").unwrap();
        assert_eq!(old.status, SourceStatus::Inactive);
        assert_eq!(new.status, SourceStatus::Active);
        assert_eq!(new.website, "https://kraken.com");
        assert_eq!(new.image_path, "/img/kraken.png");
        assert_eq!(new.background_color, "#5741d9");
    }

    #[tokio::test]
    async fn shared_node_and_recipient_are_reused_across_facts() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:arweave:bundle1").await;
        seed_fact(&store, &network, "urn:orcfax:f2", "urn:arweave:bundle2").await;

        for location in ["bundle1", "bundle2"] {
            let body = bundle(&[
                (
                    "pkg/validation-urn_orcfax_f.json",
                    &validation_json("urn:orcfax:node-1"),
                ),
                (
                    "pkg/message-coinbase.tick_1234.json",
                    &message_json("https://api.coinbase.com/v2/prices", "R9", true),
                ),
            ]);
            mock_archive(&server, location, body, "application/x-tar").await;
        }

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome.archived, 2);

        assert_eq!(store.list_nodes(&network.id).await.unwrap().len(), 1);
        assert_eq!(store.list_sources(&network.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_content_type_fails_only_this_tick() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:arweave:bundle1").await;

        mock_archive(&server, "bundle1", b"<html></html>".to_vec(), "text/html").await;

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome { archived: 0, failed: 1 });

        // Still eligible for the next tick
        assert_eq!(store.list_unarchived_facts(&network.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_validation_file_fails_the_fact() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:arweave:bundle1").await;

        let body = bundle(&[(
            "pkg/message-kraken-2024-01-01T00.00.00Z.json",
            &message_json("https://api.kraken.com", "R1", true),
        )]);
        mock_archive(&server, "bundle1", body, "application/x-tar").await;

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome { archived: 0, failed: 1 });
    }

    #[tokio::test]
    async fn short_storage_urn_fails_the_fact() {
        let server = MockServer::start().await;
        let (store, network) = seeded(&server).await;
        seed_fact(&store, &network, "urn:orcfax:f1", "urn:short").await;

        let indexer =
            ArchiveIndexer::new(&format!("{}/", server.uri()), store.clone()).unwrap();
        let outcome = indexer.run(&network).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome { archived: 0, failed: 1 });
    }
}
