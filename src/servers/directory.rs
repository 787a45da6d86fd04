//! Sorted, id-indexed collection of server records.
//!
//! Two instances exist at runtime: one for nodes and one for hubs. Ids are
//! positions in the name-sorted list and are only valid until the next
//! [`Directory::load`].

use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::OnceCell;

use super::record::{Encryption, Latency, PortSpec, ServerRecord};

#[derive(Debug, Default)]
pub struct Directory {
    records: Vec<ServerRecord>,
    /// Bumped on every load so late probe results can be recognised.
    generation: u64,
    name_index: OnceCell<HashMap<String, usize>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set, sort by name and assign ids `0..n`.
    pub fn load(&mut self, mut records: Vec<ServerRecord>) {
        records.sort_by(|a, b| a.name.cmp(&b.name));
        for (id, record) in records.iter_mut().enumerate() {
            record.id = id;
            record.latency = Latency::Unknown;
        }
        self.records = records;
        self.generation += 1;
        self.name_index = OnceCell::new();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: usize) -> Option<&ServerRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> &[ServerRecord] {
        &self.records
    }

    /// Look up the id assigned to `name` at the last load.
    ///
    /// The index is built on first use and never from an empty directory,
    /// so an early miss does not poison later lookups.
    pub fn find_id_by_name(&self, name: &str) -> Option<usize> {
        if self.records.is_empty() {
            return None;
        }
        let index = self.name_index.get_or_init(|| {
            log::debug!("Building name index over {} entries", self.records.len());
            self.records
                .iter()
                .map(|r| (r.name.clone(), r.id))
                .collect()
        });
        index.get(name).copied()
    }

    /// Ids of entries that accept `encryption`, ascending.
    pub fn ids_supporting(&self, encryption: Encryption) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.supports(encryption))
            .map(|r| r.id)
            .collect()
    }

    pub fn favorites(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.favorite)
            .map(|r| r.id)
            .collect()
    }

    /// Flip the favourite flag; returns the record's address so the caller
    /// can persist it. `None` for an unknown id.
    pub fn set_favorite(&mut self, id: usize, favorite: bool) -> Option<String> {
        let record = self.records.get_mut(id)?;
        record.favorite = favorite;
        Some(record.address.clone())
    }

    /// Mark every record whose address is in `addresses` as a favourite.
    pub fn apply_favorites(&mut self, addresses: &HashSet<String>) {
        for record in &mut self.records {
            record.favorite = addresses.contains(&record.address);
        }
    }

    pub fn latency(&self, id: usize) -> Option<Latency> {
        self.records.get(id).map(|r| r.latency)
    }

    /// No-op for ids outside `[0, len)`.
    pub fn set_latency(&mut self, id: usize, latency: Latency) {
        if let Some(record) = self.records.get_mut(id) {
            record.latency = latency;
        }
    }

    /// Distinct ports offered for `encryption` across all entries, in
    /// first-seen order.
    pub fn ports_for_encryption(&self, encryption: Encryption) -> Vec<PortSpec> {
        let mut seen = BTreeSet::new();
        let mut ports = Vec::new();
        for record in &self.records {
            for spec in record.ports_for(encryption) {
                if seen.insert(*spec) {
                    ports.push(*spec);
                }
            }
        }
        ports
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::servers::record::{PortSpec, Transport};
    use std::collections::BTreeMap;

    pub(crate) fn record(name: &str, encryptions: &[Encryption]) -> ServerRecord {
        let ports: BTreeMap<Encryption, Vec<PortSpec>> = encryptions
            .iter()
            .map(|e| {
                (
                    *e,
                    vec![PortSpec {
                        transport: Transport::Udp,
                        port: 1194,
                    }],
                )
            })
            .collect();
        ServerRecord {
            id: usize::MAX,
            name: name.to_string(),
            address: format!("{}.example.net", name.to_lowercase().replace(' ', "-")),
            ip: String::new(),
            iso_code: String::new(),
            load: 0,
            latency: Latency::Unknown,
            favorite: false,
            ports,
        }
    }

    pub(crate) fn directory(names: &[&str], encryptions: &[Encryption]) -> Directory {
        let mut dir = Directory::new();
        dir.load(names.iter().map(|n| record(n, encryptions)).collect());
        dir
    }

    #[test]
    fn load_sorts_and_assigns_ids() {
        let dir = directory(&["B", "A", "C"], &[Encryption::Rsa]);
        let names: Vec<&str> = dir.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        for id in 0..dir.len() {
            assert_eq!(dir.get(id).unwrap().id, id);
        }
        assert_eq!(dir.find_id_by_name("C"), Some(2));
        assert_eq!(dir.find_id_by_name("A"), Some(0));
        assert_eq!(dir.find_id_by_name("D"), None);
    }

    #[test]
    fn sort_is_case_sensitive_ordinal() {
        let dir = directory(&["beta", "Alpha", "Beta"], &[]);
        let names: Vec<&str> = dir.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "beta"]);
    }

    #[test]
    fn out_of_range_get_is_none() {
        let dir = directory(&["A"], &[]);
        assert!(dir.get(1).is_none());
        assert!(Directory::new().get(0).is_none());
    }

    #[test]
    fn name_lookup_before_load_does_not_stick() {
        let mut dir = Directory::new();
        assert_eq!(dir.find_id_by_name("A"), None);
        dir.load(vec![record("A", &[])]);
        assert_eq!(dir.find_id_by_name("A"), Some(0));
    }

    #[test]
    fn reload_resets_index_and_latency() {
        let mut dir = directory(&["A", "B"], &[]);
        dir.set_latency(1, Latency::Measured(40));
        assert_eq!(dir.find_id_by_name("B"), Some(1));
        let before = dir.generation();

        dir.load(vec![record("B", &[]), record("0", &[])]);
        assert_eq!(dir.find_id_by_name("B"), Some(1));
        assert_eq!(dir.find_id_by_name("A"), None);
        assert_eq!(dir.latency(1), Some(Latency::Unknown));
        assert!(dir.generation() > before);
    }

    #[test]
    fn ids_supporting_filters_by_encryption() {
        let mut dir = Directory::new();
        dir.load(vec![
            record("A", &[Encryption::Rsa]),
            record("B", &[Encryption::Ecc]),
            record("C", &[Encryption::Rsa, Encryption::Ecc]),
        ]);
        assert_eq!(dir.ids_supporting(Encryption::Rsa), vec![0, 2]);
        assert_eq!(dir.ids_supporting(Encryption::Ecc), vec![1, 2]);
        assert!(dir.ids_supporting(Encryption::Obfs2).is_empty());
    }

    #[test]
    fn set_latency_out_of_range_is_noop() {
        let mut dir = directory(&["A"], &[]);
        dir.set_latency(5, Latency::Measured(1));
        assert_eq!(dir.latency(0), Some(Latency::Unknown));
        assert_eq!(dir.latency(5), None);
    }

    #[test]
    fn favorites_follow_addresses() {
        let mut dir = directory(&["A", "B", "C"], &[]);
        let addresses: HashSet<String> = ["c.example.net".to_string()].into_iter().collect();
        dir.apply_favorites(&addresses);
        assert_eq!(dir.favorites(), vec![2]);
        assert_eq!(dir.set_favorite(0, true).as_deref(), Some("a.example.net"));
        assert_eq!(dir.favorites(), vec![0, 2]);
        assert!(dir.set_favorite(9, true).is_none());
    }

    #[test]
    fn ports_are_deduplicated() {
        let dir = directory(&["A", "B"], &[Encryption::Rsa]);
        assert_eq!(dir.ports_for_encryption(Encryption::Rsa).len(), 1);
        assert!(dir.ports_for_encryption(Encryption::Ecc).is_empty());
    }
}
