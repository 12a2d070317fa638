//! Fact-statement policy lineage discovery and rotation tracking.
//!
//! The oracle publishes its current fact-statement policy id as a datum on
//! matches of `{fact_statement_pointer}.{script_token}`. The full lineage
//! is discovered once per network; afterwards each tick checks the most
//! recent unspent pointer for a rotation.

use anyhow::{bail, Result};
use pharos_common::{calculations::SlotClock, Datastore, Network, Policy};
use pharos_module_chain_index::{ChainIndexClient, MatchOrder, MatchQuery, MatchesResponse};
use pharos_module_fact_unpacker::decode_policy_id;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

fn pointer_pattern(network: &Network) -> String {
    format!(
        "{}.{}",
        network.fact_statement_pointer, network.script_token
    )
}

/// First-boot lineage discovery: walk every pointer match oldest-first,
/// decode each child policy id, deduplicate preserving first occurrence,
/// drop ignored ids and persist the remainder ordered by starting slot.
pub async fn discover_lineage(
    client: &ChainIndexClient,
    store: &Arc<dyn Datastore>,
    network: &Network,
) -> Result<Vec<Policy>> {
    let query = MatchQuery {
        order: Some(MatchOrder::OldestFirst),
        ..Default::default()
    };
    let page = match client.matches(&pointer_pattern(network), &query, None).await? {
        MatchesResponse::Page(page) => page,
        MatchesResponse::NotModified => bail!("unconditional pointer fetch returned 304"),
    };

    let clock = SlotClock::from_network(network);
    let mut seen = HashSet::new();
    let mut policies = Vec::new();

    for m in &page.matches {
        let Some(policy_id) = resolve_policy_id(client, &m.datum_hash, &m.transaction_id).await?
        else {
            continue;
        };
        if !seen.insert(policy_id.clone()) {
            continue;
        }
        if network.ignore_policies.contains(&policy_id) {
            info!(%policy_id, "dropping ignored policy");
            continue;
        }
        policies.push(Policy {
            id: String::new(),
            network: network.id.clone(),
            policy_id,
            starting_slot: m.created_at.slot_no,
            starting_block_hash: m.created_at.header_hash.clone(),
            starting_date: clock.slot_to_date(m.created_at.slot_no),
        });
    }

    policies.sort_by_key(|p| p.starting_slot);

    let mut created = Vec::with_capacity(policies.len());
    for policy in &policies {
        created.push(store.create_policy(policy).await?);
    }
    info!(
        network = %network.name,
        count = created.len(),
        "discovered policy lineage"
    );
    Ok(created)
}

/// Per-tick rotation check against the most recent unspent pointer match.
/// Appends and returns the new policy when the id changed.
pub async fn check_rotation(
    client: &ChainIndexClient,
    store: &Arc<dyn Datastore>,
    network: &Network,
    policies: &mut Vec<Policy>,
) -> Result<Option<Policy>> {
    let query = MatchQuery {
        order: Some(MatchOrder::MostRecentFirst),
        unspent: true,
        ..Default::default()
    };
    let page = match client.matches(&pointer_pattern(network), &query, None).await? {
        MatchesResponse::Page(page) => page,
        MatchesResponse::NotModified => return Ok(None),
    };
    let Some(m) = page.matches.first() else {
        warn!(network = %network.name, "no unspent pointer match");
        return Ok(None);
    };

    let Some(policy_id) = resolve_policy_id(client, &m.datum_hash, &m.transaction_id).await?
    else {
        return Ok(None);
    };
    if network.ignore_policies.contains(&policy_id) {
        return Ok(None);
    }
    if policies.last().is_some_and(|p| p.policy_id == policy_id) {
        return Ok(None);
    }

    let clock = SlotClock::from_network(network);
    let policy = store
        .create_policy(&Policy {
            id: String::new(),
            network: network.id.clone(),
            policy_id: policy_id.clone(),
            starting_slot: m.created_at.slot_no,
            starting_block_hash: m.created_at.header_hash.clone(),
            starting_date: clock.slot_to_date(m.created_at.slot_no),
        })
        .await?;
    info!(
        network = %network.name,
        %policy_id,
        starting_slot = policy.starting_slot,
        "policy rotated"
    );
    policies.push(policy.clone());
    Ok(Some(policy))
}

/// Fetch and decode a pointer match's datum to a policy id. Matches
/// without a resolvable, decodable datum are logged and skipped.
async fn resolve_policy_id(
    client: &ChainIndexClient,
    datum_hash: &Option<String>,
    transaction_id: &str,
) -> Result<Option<String>> {
    let Some(datum_hash) = datum_hash else {
        warn!(transaction_id, "pointer match has no datum hash");
        return Ok(None);
    };
    let Some(datum) = client.datum(datum_hash).await? else {
        warn!(transaction_id, %datum_hash, "pointer datum not resolvable");
        return Ok(None);
    };
    match decode_policy_id(&datum) {
        Ok(policy_id) => Ok(Some(policy_id)),
        Err(e) => {
            warn!(transaction_id, %datum_hash, "pointer datum not decodable: {e}");
            Ok(None)
        }
    }
}
