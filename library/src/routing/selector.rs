//! Client selector expansion: index, range and stable random selection.

use sha2::{Digest, Sha256};

use crate::model::property::{PropertyMap, PropertyValue};
use crate::routing::audience::Audience;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// One client at `index` of the id-sorted audience.
    Index(usize),
    /// `count` clients starting at `start` of the id-sorted audience.
    Range { start: usize, count: usize },
    /// `count` clients in stable pseudo-random order.
    Random { count: usize },
}

fn non_negative(config: &PropertyMap, key: &str, default: usize) -> usize {
    config
        .get(key)
        .and_then(PropertyValue::as_i64)
        .map(|v| v.max(0) as usize)
        .unwrap_or(default)
}

impl SelectionMode {
    /// Reads the selector's config. Unknown modes fall back to index.
    pub fn from_config(config: &PropertyMap) -> Self {
        let count = non_negative(config, "count", 1);
        match config.get("mode").and_then(|m| m.as_str()).unwrap_or("index") {
            "range" => SelectionMode::Range {
                start: non_negative(config, "start", 0),
                count,
            },
            "random" => SelectionMode::Random { count },
            _ => SelectionMode::Index(non_negative(config, "index", 0)),
        }
    }
}

/// Hex SHA-256 of `node_id` and `client_id`.
///
/// The ordering key for random selection: it depends only on the pair, so
/// resolving the same audience twice gives the same order.
pub fn stable_hash(node_id: &str, client_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(client_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Expands a selector node to concrete client ids, in selection order.
pub fn select_clients(node_id: &str, config: &PropertyMap, audience: &Audience) -> Vec<String> {
    let ids = audience.ids();
    match SelectionMode::from_config(config) {
        SelectionMode::Index(index) => ids.get(index).cloned().into_iter().collect(),
        SelectionMode::Range { start, count } => ids.into_iter().skip(start).take(count).collect(),
        SelectionMode::Random { count } => {
            let mut keyed: Vec<(String, String)> = ids
                .into_iter()
                .map(|id| (stable_hash(node_id, &id), id))
                .collect();
            keyed.sort();
            keyed.into_iter().take(count).map(|(_, id)| id).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::property::PropertyValue;
    use crate::routing::audience::ClientInfo;

    fn audience(ids: &[&str]) -> Audience {
        Audience::from_clients(ids.iter().map(|id| ClientInfo::new(id)))
    }

    fn config(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn index_out_of_range_selects_nothing() {
        let aud = audience(&["c1", "c2"]);
        let cfg = config(&[("mode", "index".into()), ("index", 1i64.into())]);
        assert_eq!(select_clients("sel", &cfg, &aud), vec!["c2"]);
        let cfg = config(&[("mode", "index".into()), ("index", 5i64.into())]);
        assert!(select_clients("sel", &cfg, &aud).is_empty());
    }

    #[test]
    fn range_is_clamped_to_audience() {
        let aud = audience(&["c3", "c1", "c2"]);
        let cfg = config(&[
            ("mode", "range".into()),
            ("start", 1i64.into()),
            ("count", 10i64.into()),
        ]);
        assert_eq!(select_clients("sel", &cfg, &aud), vec!["c2", "c3"]);
    }

    #[test]
    fn random_order_is_deterministic() {
        let aud = audience(&["a", "b", "c", "d", "e"]);
        let cfg = config(&[("mode", "random".into()), ("count", 3i64.into())]);
        let first = select_clients("sel-1", &cfg, &aud);
        assert_eq!(first.len(), 3);
        for _ in 0..5 {
            assert_eq!(select_clients("sel-1", &cfg, &aud), first);
        }
        let reordered = audience(&["e", "d", "c", "b", "a"]);
        assert_eq!(select_clients("sel-1", &cfg, &reordered), first);
    }
}
