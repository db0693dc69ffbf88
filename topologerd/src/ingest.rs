//! Turns one parsed traceroute into a stored path.
//!
//! Only hops with a public address take part: each becomes (or refreshes) a
//! router, and consecutive public hops are chained into links. The last
//! public hop links to itself.

use std::collections::HashMap;
use std::net::IpAddr;
use anyhow::{Context, Result};
use shared::types::Hop;
use crate::config::SystemConfig;
use crate::geo::GeoLocator;
use crate::net;
use crate::store::db::{NewLink, NewPath, RouterUpsert};
use crate::store_manager::StoreHandle;

/// What the path is recorded against
#[derive(Debug, Clone, PartialEq)]
pub struct PathTarget {
    pub address: String,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub path_id: i64,
    pub routers: usize,
    pub links: usize,
    pub skipped_private: usize,
}

/// Public address of a hop, if it has one. Addresses that do not parse as
/// IP literals are never eligible.
fn public_address(hop: &Hop) -> Option<(&str, IpAddr)> {
    let address = hop.ip.as_deref()?;
    let ip = net::parse_addr(address)?;
    (!net::is_private_ip(ip)).then_some((address, ip))
}

pub async fn ingest(
    store: &StoreHandle,
    geo: &dyn GeoLocator,
    system: &SystemConfig,
    target: &PathTarget,
    hops: &[Hop],
) -> Result<IngestSummary> {
    let system = store
        .ensure_system(system.clone())
        .await
        .context("Failed to get measurement system")?;

    // Every upsert completes before any link is built
    let mut routers: HashMap<String, i64> = HashMap::new();
    for hop in hops {
        let Some((address, ip)) = public_address(hop) else {
            continue;
        };

        let location = geo.locate(ip);
        if let Some(label) = location.label() {
            tracing::debug!("Hop {} {} located in {}", hop.hop, address, label);
        }

        let router = store
            .upsert_router(RouterUpsert {
                address: address.to_string(),
                hostname: hop.hostname.clone(),
                geo: location,
            })
            .await?;
        routers.insert(address.to_string(), router.id);
    }

    let links = build_links(hops, &routers);
    let skipped_private = hops
        .iter()
        .filter(|hop| hop.ip.as_deref().map_or(false, net::is_private))
        .count();

    let link_count = links.len();
    let path_id = store
        .create_path(NewPath {
            system_id: system.id,
            target_address: target.address.clone(),
            target_hostname: target.hostname.clone(),
            links,
        })
        .await?;

    Ok(IngestSummary {
        path_id,
        routers: routers.len(),
        links: link_count,
        skipped_private,
    })
}

/// One link per public hop, pointing at the next public hop's router, or
/// back at its own router for the last one. Sequence is the hop number as
/// reported.
pub fn build_links(hops: &[Hop], routers: &HashMap<String, i64>) -> Vec<NewLink> {
    let public: Vec<(&Hop, i64)> = hops
        .iter()
        .filter_map(|hop| {
            let (address, _) = public_address(hop)?;
            routers.get(address).map(|&id| (hop, id))
        })
        .collect();

    public
        .iter()
        .enumerate()
        .map(|(i, &(hop, source_id))| {
            let destination_id = public.get(i + 1).map_or(source_id, |&(_, id)| id);
            NewLink {
                sequence: hop.hop,
                source_id,
                destination_id,
                rtt: hop.rtt.first().and_then(|sample| sample.parse().ok()),
            }
        })
        .collect()
}
