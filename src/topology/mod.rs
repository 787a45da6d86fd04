//! Hub/node hierarchy derived from the two directories.

pub mod names;
pub mod resolver;

pub use names::{clear_name, ClearedNameIndex};
pub use resolver::{resolve, Level0Entry, Topology, TopologyCache};
