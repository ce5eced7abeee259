//! Cluster tokenmap value objects and ring ordering.
//!
//! The tokenmap is persisted as a JSON object `fqdn -> {tokens,
//! is_up}` and exposed in memory as a typed value; JSON conversion
//! happens at the storage boundary only.

use ringvault_shared::{ErrorCode, ErrorEnvelope, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ring membership of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingEntry {
    /// Owned tokens (vnodes); length >= 1 on a valid ring.
    pub tokens: Vec<String>,
    /// Liveness as reported when the map was captured.
    pub is_up: bool,
}

/// Mapping of node fqdn to its ring entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenMap {
    entries: BTreeMap<String, RingEntry>,
}

impl TokenMap {
    /// Create an empty tokenmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for a node.
    pub fn insert(&mut self, fqdn: impl Into<String>, entry: RingEntry) {
        self.entries.insert(fqdn.into(), entry);
    }

    /// Look up the entry for a node.
    #[must_use]
    pub fn get(&self, fqdn: &str) -> Option<&RingEntry> {
        self.entries.get(fqdn)
    }

    /// Returns true when the node appears in the map.
    #[must_use]
    pub fn contains(&self, fqdn: &str) -> bool {
        self.entries.contains_key(fqdn)
    }

    /// Number of nodes in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the map has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(fqdn, entry)` pairs in fqdn order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RingEntry)> {
        self.entries.iter().map(|(fqdn, entry)| (fqdn.as_str(), entry))
    }

    /// All node fqdns in fqdn order.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Canonical ring sort key of an entry: the node's tokens, sorted
    /// lexicographically and joined with `,`.
    #[must_use]
    pub fn token_order_key(entry: &RingEntry) -> String {
        let mut tokens = entry.tokens.clone();
        tokens.sort();
        tokens.join(",")
    }

    /// Nodes sorted by their canonical token key.
    #[must_use]
    pub fn hosts_in_token_order(&self) -> Vec<String> {
        let mut keyed: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(fqdn, entry)| (Self::token_order_key(entry), fqdn.clone()))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, fqdn)| fqdn).collect()
    }

    /// The node preceding `fqdn` in canonical token order, if any.
    ///
    /// The lowest node has no predecessor. Unknown nodes return `None`.
    #[must_use]
    pub fn predecessor_of(&self, fqdn: &str) -> Option<String> {
        let ordered = self.hosts_in_token_order();
        let position = ordered.iter().position(|host| host == fqdn)?;
        if position == 0 {
            return None;
        }
        ordered.get(position - 1).cloned()
    }

    /// Comma-joined tokens for one node, in stored order.
    pub fn tokens_csv(&self, fqdn: &str) -> Result<String> {
        let entry = self.entries.get(fqdn).ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::not_found(),
                format!("node {fqdn} is not in the tokenmap"),
            )
        })?;
        Ok(entry.tokens.join(","))
    }

    /// Parse a tokenmap from its JSON encoding.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("domain", "invalid_tokenmap"),
                format!("tokenmap is not valid JSON: {error}"),
            )
        })
    }

    /// Encode the tokenmap as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|error| {
            ErrorEnvelope::invariant(
                ErrorCode::internal(),
                format!("tokenmap serialization failed: {error}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(tokens: &[&str], is_up: bool) -> RingEntry {
        RingEntry {
            tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
            is_up,
        }
    }

    fn three_node_map() -> TokenMap {
        let mut map = TokenMap::new();
        map.insert("n2", entry(&["200", "250"], true));
        map.insert("n1", entry(&["100", "150"], true));
        map.insert("n3", entry(&["300"], false));
        map
    }

    #[test]
    fn token_order_uses_sorted_token_concatenation() {
        let map = three_node_map();
        assert_eq!(map.hosts_in_token_order(), vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn unsorted_vnodes_do_not_change_the_key() {
        let shuffled = entry(&["250", "200"], true);
        let sorted = entry(&["200", "250"], true);
        assert_eq!(
            TokenMap::token_order_key(&shuffled),
            TokenMap::token_order_key(&sorted)
        );
    }

    #[test]
    fn predecessor_walks_the_ring() {
        let map = three_node_map();
        assert_eq!(map.predecessor_of("n1"), None);
        assert_eq!(map.predecessor_of("n2"), Some("n1".to_owned()));
        assert_eq!(map.predecessor_of("n3"), Some("n2".to_owned()));
        assert_eq!(map.predecessor_of("unknown"), None);
    }

    #[test]
    fn json_round_trip_preserves_entries() {
        let map = three_node_map();
        let encoded = map.to_json().expect("encode tokenmap");
        let decoded = TokenMap::from_json(&encoded).expect("decode tokenmap");
        assert_eq!(decoded, map);
        assert!(decoded.get("n3").is_some_and(|e| !e.is_up));
    }

    #[test]
    fn wire_shape_is_an_object_per_fqdn() {
        let encoded = three_node_map().to_json().expect("encode tokenmap");
        assert!(encoded.contains("\"n1\":{\"tokens\":[\"100\",\"150\"],\"is_up\":true}"));
    }

    #[test]
    fn tokens_csv_requires_membership() {
        let map = three_node_map();
        assert_eq!(map.tokens_csv("n3").expect("csv"), "300");
        assert!(map.tokens_csv("n9").is_err());
    }

    proptest! {
        #[test]
        fn predecessor_is_consistent_with_order(
            tokens in proptest::collection::btree_map("[a-z0-9]{1,8}", proptest::collection::vec("[0-9]{1,6}", 1..4), 2..6)
        ) {
            let mut map = TokenMap::new();
            for (fqdn, node_tokens) in &tokens {
                map.insert(fqdn.clone(), RingEntry { tokens: node_tokens.clone(), is_up: true });
            }
            let ordered = map.hosts_in_token_order();
            for window in ordered.windows(2) {
                prop_assert_eq!(map.predecessor_of(&window[1]), Some(window[0].clone()));
            }
            if let Some(first) = ordered.first() {
                prop_assert_eq!(map.predecessor_of(first), None);
            }
        }
    }
}
