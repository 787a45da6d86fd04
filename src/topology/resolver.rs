//! Two-level view of the directories for one encryption mode.
//!
//! Level 0 mixes hubs and unclustered nodes; level 1 lists, per hub, the
//! node ids clustered beneath it. The result is cached until explicitly
//! invalidated (reload, re-login, encryption change).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::names::ClearedNameIndex;
use crate::servers::{Directory, Encryption};

/// One row of the top-level list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Level0Entry {
    pub is_hub: bool,
    /// Hub id when `is_hub`, node id otherwise.
    pub id: usize,
}

impl Level0Entry {
    pub fn hub(id: usize) -> Self {
        Self { is_hub: true, id }
    }

    pub fn node(id: usize) -> Self {
        Self { is_hub: false, id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub encryption: Encryption,
    pub level0: Vec<Level0Entry>,
    pub level1: BTreeMap<usize, Vec<usize>>,
}

impl Topology {
    pub fn empty(encryption: Encryption) -> Self {
        Self {
            encryption,
            level0: Vec::new(),
            level1: BTreeMap::new(),
        }
    }

    /// Node ids under `hub`; empty for unknown hubs.
    pub fn level1(&self, hub: usize) -> &[usize] {
        self.level1.get(&hub).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.level0.is_empty() && self.level1.is_empty()
    }
}

/// Build the hierarchy for `encryption`.
///
/// A hub's own entry in the node directory (same display name) is seeded
/// as the first member of its cluster and surfaces in level 0 as the hub.
/// Nodes whose cleared name matches no hub available in this mode stay
/// in level 0 as plain nodes.
pub fn resolve(
    nodes: &Directory,
    hubs: &Directory,
    index: &ClearedNameIndex,
    encryption: Encryption,
) -> Topology {
    let mut topology = Topology::empty(encryption);
    if nodes.is_empty() {
        log::debug!("Node directory is empty, nothing to resolve");
        return topology;
    }

    let hub_ids = hubs.ids_supporting(encryption);
    log::debug!(
        "Encryption {} has {} hubs and {} nodes",
        encryption,
        hub_ids.len(),
        nodes.len()
    );

    // node id -> hub id for nodes that are the hub itself
    let mut claimed: HashMap<usize, usize> = HashMap::new();
    for &hub in &hub_ids {
        let alias = hubs
            .get(hub)
            .and_then(|r| nodes.find_id_by_name(&r.name))
            .filter(|node| nodes.get(*node).map(|r| r.supports(encryption)).unwrap_or(false));
        let mut members = Vec::new();
        if let Some(node) = alias {
            claimed.insert(node, hub);
            members.push(node);
        }
        topology.level1.insert(hub, members);
    }

    let mut placed_hubs = HashSet::new();
    for node in nodes.ids_supporting(encryption) {
        if let Some(&hub) = claimed.get(&node) {
            topology.level0.push(Level0Entry::hub(hub));
            placed_hubs.insert(hub);
            continue;
        }
        match index
            .hub_for_node(nodes, node)
            .and_then(|hub| topology.level1.get_mut(&hub))
        {
            Some(members) => members.push(node),
            None => topology.level0.push(Level0Entry::node(node)),
        }
    }

    for hub in hub_ids {
        if !placed_hubs.contains(&hub) {
            topology.level0.push(Level0Entry::hub(hub));
        }
    }

    topology
}

/// Holds at most one resolved topology.
#[derive(Debug, Default)]
pub struct TopologyCache {
    current: RwLock<Option<Arc<Topology>>>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached topology for `encryption`, resolving with `build`
    /// when the cache is empty or holds another mode.
    pub fn get_or_resolve<F>(&self, encryption: Encryption, build: F) -> Arc<Topology>
    where
        F: FnOnce() -> Topology,
    {
        if let Some(cached) = self.current.read().as_ref() {
            if cached.encryption == encryption {
                return Arc::clone(cached);
            }
        }

        let mut current = self.current.write();
        if let Some(cached) = current.as_ref() {
            if cached.encryption == encryption {
                return Arc::clone(cached);
            }
        }
        let topology = Arc::new(build());
        // An empty result is not cached so the next call retries once lists arrive.
        if !topology.is_empty() {
            *current = Some(Arc::clone(&topology));
        }
        topology
    }

    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    pub fn is_cached(&self) -> bool {
        self.current.read().is_some()
    }
}
