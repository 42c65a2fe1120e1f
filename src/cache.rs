use std::collections::{HashMap, HashSet};

use crate::domain::HashId;
use crate::error::Result;
use crate::store::Store;

/// Above this many cached nodes, a populate call first trims the cache down
/// to its own working set.
const NODE_CACHE_LIMIT: usize = 1_000_000;

/// Node contents held by the cache: everything a search needs to test a node
/// and decide which children to visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedNode {
    pub value: u64,
    pub radius: Option<u32>,
    pub inner_id: Option<HashId>,
    pub outer_id: Option<HashId>,
}

/// Process-local cache of VP-tree node contents, amortizing repeated node
/// reads within one search or maintenance pass.
///
/// Not transaction-aware: every write path invalidates the touched ids, and
/// a rolled-back transaction must drop the whole cache via `clear`.
#[derive(Debug)]
pub(crate) struct NodeCache {
    nodes: HashMap<HashId, CachedNode>,
    not_in_tree: HashSet<HashId>,
    root_id: Option<HashId>,
    limit: usize,
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            not_in_tree: HashSet::new(),
            root_id: None,
            limit: NODE_CACHE_LIMIT,
        }
    }

    #[cfg(test)]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::new()
        }
    }

    /// The current root node id, read through the cache.
    pub fn root(&mut self, store: &Store) -> Result<Option<HashId>> {
        if self.root_id.is_none() {
            self.root_id = store.root_node_id()?;
        }
        Ok(self.root_id)
    }

    /// Batch-read any of `hash_ids` not yet cached. Ids with no tree row are
    /// remembered as such so they are not re-queried every pass.
    pub fn populate(&mut self, store: &Store, hash_ids: &[HashId]) -> Result<()> {
        if self.nodes.len() > self.limit {
            let keep: HashSet<HashId> = hash_ids.iter().copied().collect();
            self.nodes.retain(|id, _| keep.contains(id));
        }

        let uncached: Vec<HashId> = hash_ids
            .iter()
            .copied()
            .filter(|id| !self.nodes.contains_key(id) && !self.not_in_tree.contains(id))
            .collect();
        if uncached.is_empty() {
            return Ok(());
        }

        let rows = store.tree_nodes(&uncached)?;
        if rows.len() < uncached.len() {
            let found: HashSet<HashId> = rows.iter().map(|(id, _)| *id).collect();
            for id in &uncached {
                if !found.contains(id) {
                    self.not_in_tree.insert(*id);
                }
            }
        }
        self.nodes.extend(rows);
        Ok(())
    }

    pub fn get(&self, hash_id: HashId) -> Option<&CachedNode> {
        self.nodes.get(&hash_id)
    }

    /// Forget everything cached about the given ids.
    pub fn invalidate<I>(&mut self, hash_ids: I)
    where
        I: IntoIterator<Item = HashId>,
    {
        for id in hash_ids {
            self.nodes.remove(&id);
            self.not_in_tree.remove(&id);
            if self.root_id == Some(id) {
                self.root_id = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.not_in_tree.clear();
        self.root_id = None;
    }

    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_leaves(values: &[u64]) -> (Store, Vec<HashId>) {
        let store = Store::open_in_memory().unwrap();
        let ids: Vec<HashId> = values
            .iter()
            .map(|&v| {
                let id = store.insert_hash_value(v).unwrap();
                store.insert_leaf_row(id, None).unwrap();
                id
            })
            .collect();
        (store, ids)
    }

    #[test]
    fn test_populate_and_get() {
        let (store, ids) = store_with_leaves(&[10, 20]);
        let mut cache = NodeCache::new();

        cache.populate(&store, &ids).unwrap();
        assert_eq!(cache.get(ids[0]).unwrap().value, 10);
        assert_eq!(cache.get(ids[1]).unwrap().value, 20);
    }

    #[test]
    fn test_missing_ids_are_remembered() {
        let (store, ids) = store_with_leaves(&[10]);
        let mut cache = NodeCache::new();

        cache.populate(&store, &[ids[0], 999]).unwrap();
        assert!(cache.get(999).is_none());
        assert!(cache.not_in_tree.contains(&999));

        // A later write to that id must drop the negative entry.
        cache.invalidate([999]);
        assert!(!cache.not_in_tree.contains(&999));
    }

    #[test]
    fn test_invalidate_clears_cached_root() {
        let (store, ids) = store_with_leaves(&[10]);
        let mut cache = NodeCache::new();

        assert_eq!(cache.root(&store).unwrap(), Some(ids[0]));
        cache.invalidate([ids[0]]);
        assert_eq!(cache.root_id, None);
        // Re-reads from storage.
        assert_eq!(cache.root(&store).unwrap(), Some(ids[0]));
    }

    #[test]
    fn test_over_limit_trims_to_working_set() {
        let (store, ids) = store_with_leaves(&[1, 2, 3, 4, 5]);
        let mut cache = NodeCache::with_limit(3);

        cache.populate(&store, &ids).unwrap();
        assert_eq!(cache.cached_count(), 5);

        // Next populate only wants two ids; the rest are trimmed.
        cache.populate(&store, &ids[..2]).unwrap();
        assert_eq!(cache.cached_count(), 2);
        assert!(cache.get(ids[0]).is_some());
        assert!(cache.get(ids[4]).is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let (store, ids) = store_with_leaves(&[10]);
        let mut cache = NodeCache::new();
        cache.populate(&store, &ids).unwrap();
        cache.root(&store).unwrap();

        cache.clear();
        assert_eq!(cache.cached_count(), 0);
        assert_eq!(cache.root_id, None);
    }
}
