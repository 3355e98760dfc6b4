//! Consistent hash ring
//!
//! Maps keys to node ids. Each node has one point on the ring; a key belongs
//! to the first node at or after its own hash, wrapping to the start.

use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::Hasher;
use tracing::warn;

/// Hash function placing nodes and keys on the ring
pub type HashFn = fn(&[u8]) -> u64;

/// SipHash-1-3 with zero keys, stable across processes
pub fn default_hash(data: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(data);
    hasher.finish()
}

/// Consistent hash ring over node ids
pub struct HashRing {
    hash_fn: HashFn,
    /// Always sorted ascending
    hashes: Vec<u64>,
    nodes: HashMap<u64, String>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::with_hash(default_hash)
    }

    pub fn with_hash(hash_fn: HashFn) -> Self {
        HashRing {
            hash_fn,
            hashes: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Place nodes on the ring; empty names are ignored
    pub fn add_nodes<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for node in nodes {
            let node = node.as_ref();
            if node.is_empty() {
                continue;
            }
            let hash = (self.hash_fn)(node.as_bytes());
            match self.nodes.insert(hash, node.to_string()) {
                Some(previous) if previous != node => {
                    warn!("Ring hash collision: {} replaces {}", node, previous);
                }
                Some(_) => {}
                None => self.hashes.push(hash),
            }
        }
        self.hashes.sort_unstable();
    }

    /// Node owning `key`, `None` on an empty ring
    pub fn pick_node(&self, key: &[u8]) -> Option<&str> {
        if self.hashes.is_empty() {
            return None;
        }
        let hash = (self.hash_fn)(key);
        let idx = self.hashes.partition_point(|&h| h < hash);
        let idx = if idx == self.hashes.len() { 0 } else { idx };
        self.nodes.get(&self.hashes[idx]).map(String::as_str)
    }

    /// Node ids in ring order
    pub fn nodes_in_order(&self) -> Vec<String> {
        self.hashes
            .iter()
            .filter_map(|h| self.nodes.get(h).cloned())
            .collect()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}
