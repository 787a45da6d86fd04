//! Name-based clustering of nodes under hubs.

use std::collections::HashMap;

use crate::servers::Directory;

const HUB_MARKER: &str = "Hub";

/// Reduce a display name to the key shared by a hub and its nodes:
/// "Chile Hub", "Chile 2" and "Chile #3" all become "Chile".
pub fn clear_name(name: &str) -> String {
    let mut tokens: Vec<&str> = name
        .split_whitespace()
        .filter(|t| *t != HUB_MARKER)
        .collect();

    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && is_ordinal_token(last) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join(" ")
}

/// "2", "#2", "-", "02"
fn is_ordinal_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_digit() || c == '#' || c == '-')
}

/// ClearedName -> hub id, built from the hub directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearedNameIndex {
    map: HashMap<String, usize>,
}

impl ClearedNameIndex {
    /// The first hub (lowest id) wins when two hubs clear to the same name.
    /// Entries without the hub marker are not hubs and are skipped.
    pub fn build(hubs: &Directory) -> Self {
        let mut map = HashMap::new();
        for hub in hubs.records() {
            if !hub.is_hub() {
                log::debug!("Hub list entry {} ({}) has no hub marker", hub.id, hub.name);
                continue;
            }
            let cleared = clear_name(&hub.name);
            log::debug!(
                "Hub {} ({}) has cleared name {:?}",
                hub.id,
                hub.name,
                cleared
            );
            map.entry(cleared).or_insert(hub.id);
        }
        Self { map }
    }

    pub fn hub_for(&self, cleared: &str) -> Option<usize> {
        self.map.get(cleared).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hub a node belongs to by naming convention, if any.
    pub fn hub_for_node(&self, nodes: &Directory, node: usize) -> Option<usize> {
        let record = match nodes.get(node) {
            Some(r) => r,
            None => {
                log::warn!("Hub for server node {} requested but out of bounds", node);
                return None;
            }
        };
        let cleared = clear_name(&record.name);
        let hub = self.hub_for(&cleared);
        if hub.is_none() {
            log::debug!("No hub for cleared name {:?}", cleared);
        }
        hub
    }
}
