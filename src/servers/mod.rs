//! Server and hub directories
//!
//! - record.rs: API wire format, `ServerRecord`, encryption modes, latency
//! - directory.rs: sorted id-indexed collection
//! - fetch.rs: list endpoints
//! - cache.rs: last good list on disk

pub mod cache;
pub mod directory;
pub mod fetch;
pub mod record;

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use directory::Directory;
pub use fetch::{ApiServerSource, Credentials, ServerSource};
pub use record::{ApiServer, Encryption, Latency, PortSpec, ServerRecord, Transport};

/// Which directory an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Nodes,
    Hubs,
}

impl Scope {
    pub fn noun(&self) -> &'static str {
        match self {
            Scope::Nodes => "server",
            Scope::Hubs => "hub",
        }
    }

    pub fn from_show_nodes(show_nodes: bool) -> Self {
        if show_nodes {
            Scope::Nodes
        } else {
            Scope::Hubs
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.noun())
    }
}

/// The node and hub directories, shared between the manager and the probe
/// scheduler.
#[derive(Debug, Default)]
pub struct Directories {
    pub nodes: RwLock<Directory>,
    pub hubs: RwLock<Directory>,
}

impl Directories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: Scope) -> &RwLock<Directory> {
        match scope {
            Scope::Nodes => &self.nodes,
            Scope::Hubs => &self.hubs,
        }
    }

    pub fn both_loaded(&self) -> bool {
        !self.nodes.read().is_empty() && !self.hubs.read().is_empty()
    }
}
