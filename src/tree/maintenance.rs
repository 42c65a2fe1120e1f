use std::collections::VecDeque;

use crate::cache::NodeCache;
use crate::domain::{Budget, FileId, HashId, PotentialPair, ScanReport};
use crate::error::Result;
use crate::hamming;
use crate::store::{NodeRow, Store};
use crate::tree::root::RootPicker;
use crate::tree::search_file_hits;

/// Files pulled per round by the duplicate scan, so budget checks stay
/// responsive.
const SCAN_BATCH: usize = 256;

/// Outstanding below-watermark files before background work is worth it.
const MAINTENANCE_DUE_THRESHOLD: usize = 100;

struct PendingNode {
    parent_id: Option<HashId>,
    hash_id: HashId,
    value: u64,
    children: Vec<(HashId, u64)>,
}

/// Tear down the branch rooted at `hash_id` and rebuild it balanced.
///
/// Hash ids in the branch with no remaining file link are deleted for good
/// here — this is the only place registry rows die. The rebuilt branch is
/// attached under the old parent in whichever slot pointed at the old root.
pub(crate) fn regenerate_branch(
    store: &Store,
    cache: &mut NodeCache,
    picker: &mut dyn RootPicker,
    hash_id: HashId,
) -> Result<()> {
    let Some(parent_link) = store.node_parent(hash_id)? else {
        // Already rebuilt away by an earlier regeneration.
        store.dequeue_branch(hash_id)?;
        return Ok(());
    };
    let Some(parent_id) = parent_link else {
        // The root cannot be rebalanced: there is no parent to spread across.
        store.dequeue_branch(hash_id)?;
        if !store.linked_hash_ids(&[hash_id])?.contains(&hash_id) {
            // An orphaned root can never be regenerated away, so its
            // registry row would live forever; rebuild the whole tree
            // instead, which prunes it.
            regenerate_tree(store, cache, picker)?;
        }
        return Ok(());
    };

    let branch_nodes = store.subtree_nodes(hash_id)?;
    let branch_ids: Vec<HashId> = branch_nodes.iter().map(|(id, _)| *id).collect();
    log::debug!(
        "rebuilding branch rooted at {hash_id}: {} nodes",
        branch_ids.len()
    );

    store.delete_nodes(&branch_ids)?;
    store.dequeue_branches(&branch_ids)?;
    cache.invalidate(branch_ids.iter().copied());

    let useful_ids = store.linked_hash_ids(&branch_ids)?;
    let orphan_ids: Vec<HashId> = branch_ids
        .iter()
        .copied()
        .filter(|id| !useful_ids.contains(id))
        .collect();
    store.delete_hashes(&orphan_ids)?;

    let mut useful_nodes: Vec<(HashId, u64)> = branch_nodes
        .into_iter()
        .filter(|(id, _)| useful_ids.contains(id))
        .collect();
    let useful_population = useful_nodes.len() as i64;

    let Some(parent_inner_id) = store.parent_inner_id(parent_id)? else {
        log::warn!(
            "expected parent {parent_id} is missing from the similarity tree; \
             clearing the maintenance queue — run regenerate_tree() to repair"
        );
        store.clear_branch_queue()?;
        return Ok(());
    };

    let new_root = if useful_nodes.is_empty() {
        None
    } else {
        Some(picker.pop_best(&mut useful_nodes))
    };
    let new_root_id = new_root.map(|(id, _)| id);

    if parent_inner_id == Some(hash_id) {
        store.set_parent_inner(parent_id, new_root_id, useful_population)?;
    } else {
        store.set_parent_outer(parent_id, new_root_id, useful_population)?;
    }
    cache.invalidate([parent_id]);

    if let Some((root_id, root_value)) = new_root {
        generate_branch(
            store,
            cache,
            picker,
            Some(parent_id),
            root_id,
            root_value,
            useful_nodes,
        )?;
    }
    Ok(())
}

/// Build a balanced branch top-down, breadth-first, from a chosen root and a
/// flat child list, committing every row in one batch at the end.
///
/// Each level splits its children at the median distance to the level root.
/// The tie group at the median joins whichever side is smaller; when it
/// joins the outer side, the radius steps down by one so the outer side
/// strictly excludes the ties. This keeps the split within one element of
/// even, modulo the tie group.
pub(crate) fn generate_branch(
    store: &Store,
    cache: &mut NodeCache,
    picker: &mut dyn RootPicker,
    parent_id: Option<HashId>,
    root_id: HashId,
    root_value: u64,
    children: Vec<(HashId, u64)>,
) -> Result<()> {
    let mut process_queue = VecDeque::new();
    process_queue.push_back(PendingNode {
        parent_id,
        hash_id: root_id,
        value: root_value,
        children,
    });

    let mut rows: Vec<NodeRow> = Vec::new();

    while let Some(pending) = process_queue.pop_front() {
        if pending.children.is_empty() {
            rows.push(NodeRow {
                hash_id: pending.hash_id,
                parent_id: pending.parent_id,
                radius: None,
                inner_id: None,
                inner_population: 0,
                outer_id: None,
                outer_population: 0,
            });
            continue;
        }

        let mut by_distance: Vec<(u32, HashId, u64)> = pending
            .children
            .iter()
            .map(|&(id, value)| (hamming::distance(pending.value, value), id, value))
            .collect();
        by_distance.sort_unstable();

        let median_radius = by_distance[by_distance.len() / 2].0;
        let mut inner: Vec<(HashId, u64)> = Vec::new();
        let mut ties: Vec<(HashId, u64)> = Vec::new();
        let mut outer: Vec<(HashId, u64)> = Vec::new();
        for (distance, id, value) in by_distance {
            if distance < median_radius {
                inner.push((id, value));
            } else if distance == median_radius {
                ties.push((id, value));
            } else {
                outer.push((id, value));
            }
        }

        let radius = if inner.len() <= outer.len() {
            inner.extend(ties);
            median_radius
        } else {
            outer.extend(ties);
            median_radius - 1
        };

        let inner_population = inner.len() as i64;
        let outer_population = outer.len() as i64;

        let (inner_root_id, inner_root_value) = picker.pop_best(&mut inner);
        let outer_root = if outer.is_empty() {
            None
        } else {
            Some(picker.pop_best(&mut outer))
        };

        rows.push(NodeRow {
            hash_id: pending.hash_id,
            parent_id: pending.parent_id,
            radius: Some(radius),
            inner_id: Some(inner_root_id),
            inner_population,
            outer_id: outer_root.map(|(id, _)| id),
            outer_population,
        });

        process_queue.push_back(PendingNode {
            parent_id: Some(pending.hash_id),
            hash_id: inner_root_id,
            value: inner_root_value,
            children: inner,
        });
        if let Some((outer_root_id, outer_root_value)) = outer_root {
            process_queue.push_back(PendingNode {
                parent_id: Some(pending.hash_id),
                hash_id: outer_root_id,
                value: outer_root_value,
                children: outer,
            });
        }
    }

    store.replace_node_rows(&rows)?;
    cache.invalidate(rows.iter().map(|row| row.hash_id));
    Ok(())
}

/// Drain the regeneration queue, heaviest branch first, one transaction per
/// branch. Stops between branches when the budget expires; queued ids that
/// no longer join to the tree clear the queue.
pub(crate) fn maintain(
    store: &Store,
    cache: &mut NodeCache,
    picker: &mut dyn RootPicker,
    budget: &Budget,
) -> Result<()> {
    loop {
        if budget.expired() {
            log::debug!("tree maintenance stopping: budget exhausted");
            return Ok(());
        }

        let Some(next_id) = store.heaviest_queued_branch()? else {
            if store.queued_branch_count()? > 0 {
                store.clear_branch_queue()?;
            }
            return Ok(());
        };

        let tx = store.begin()?;
        match regenerate_branch(store, cache, picker, next_id) {
            Ok(()) => tx.commit()?,
            Err(err) => {
                drop(tx);
                cache.clear();
                return Err(err);
            }
        }
    }
}

/// Full rebuild: prune hash rows with no live file link, drop the whole
/// tree, and regenerate it from the remaining registry.
pub(crate) fn regenerate_tree(
    store: &Store,
    cache: &mut NodeCache,
    picker: &mut dyn RootPicker,
) -> Result<()> {
    let pruned = store.delete_unlinked_hashes()?;
    store.clear_tree()?;
    cache.clear();

    let mut all_nodes = store.all_hash_nodes()?;
    log::info!(
        "regenerating similarity tree from {} hashes ({pruned} orphans pruned)",
        all_nodes.len()
    );

    if !all_nodes.is_empty() {
        let (root_id, root_value) = picker.pop_best(&mut all_nodes);
        generate_branch(store, cache, picker, None, root_id, root_value, all_nodes)?;
    }

    store.clear_branch_queue()?;
    Ok(())
}

/// Work through files whose watermark sits below `search_distance`: search
/// each one, forward non-self pairs to the consumer, then stamp the
/// watermark. Budget-checked per file; safe to re-enter after a stop.
pub(crate) fn scan_for_potential_duplicates(
    store: &Store,
    cache: &mut NodeCache,
    search_distance: u32,
    budget: &Budget,
    on_pair: &mut dyn FnMut(PotentialPair),
) -> Result<ScanReport> {
    let mut report = ScanReport {
        files_searched: 0,
        pairs_found: 0,
        completed: false,
    };

    loop {
        let batch = store.files_below_watermark(search_distance, SCAN_BATCH)?;
        if batch.is_empty() {
            report.completed = true;
            return Ok(report);
        }

        for file_id in batch {
            if budget.expired() {
                log::debug!(
                    "duplicate scan stopping after {} files: budget exhausted",
                    report.files_searched
                );
                return Ok(report);
            }

            let hits = search_file_hits(store, cache, file_id, search_distance)?;
            let mut pairs: Vec<(FileId, u32)> = hits
                .into_iter()
                .filter(|&(candidate_id, _)| candidate_id != file_id)
                .collect();
            pairs.sort_unstable();

            for (candidate_id, distance) in pairs {
                on_pair(PotentialPair {
                    file_id,
                    candidate_id,
                    distance,
                });
                report.pairs_found += 1;
            }

            store.set_searched_distance(file_id, search_distance)?;
            report.files_searched += 1;
        }
    }
}

/// Whether enough below-watermark files have piled up to make a background
/// scan worthwhile.
pub(crate) fn maintenance_due(store: &Store, search_distance: u32) -> Result<bool> {
    let outstanding =
        store.count_files_below_watermark(search_distance, MAINTENANCE_DUE_THRESHOLD)?;
    Ok(outstanding >= MAINTENANCE_DUE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::{assert_tree_invariants, insert_value};

    /// Deterministic picker for reproducible tree shapes: always takes the
    /// first candidate.
    struct FirstPicker;

    impl RootPicker for FirstPicker {
        fn pop_best(&mut self, candidates: &mut Vec<(HashId, u64)>) -> (HashId, u64) {
            candidates.remove(0)
        }
    }

    fn make_index() -> (Store, NodeCache) {
        (Store::open_in_memory().unwrap(), NodeCache::new())
    }

    /// Register `values`, link each to a distinct file, and insert as leaves.
    fn populate(store: &Store, cache: &mut NodeCache, values: &[u64]) -> Vec<HashId> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let hash_id = insert_value(store, cache, value);
                store.insert_link(i as FileId + 1, hash_id).unwrap();
                hash_id
            })
            .collect()
    }

    fn scrambled_values(count: usize) -> Vec<u64> {
        let mut values = Vec::with_capacity(count);
        let mut value: u64 = 0x0123_4567_89AB_CDEF;
        while values.len() < count {
            value = value.rotate_left(13).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
            if !values.contains(&value) {
                values.push(value);
            }
        }
        values
    }

    #[test]
    fn test_generate_branch_balance_bound() {
        let (store, mut cache) = make_index();
        let values = scrambled_values(41);
        let ids: Vec<HashId> = values
            .iter()
            .map(|&v| store.insert_hash_value(v).unwrap())
            .collect();

        let root_id = ids[0];
        let root_value = values[0];
        let children: Vec<(HashId, u64)> = ids[1..]
            .iter()
            .copied()
            .zip(values[1..].iter().copied())
            .collect();

        generate_branch(
            &store,
            &mut cache,
            &mut FirstPicker,
            None,
            root_id,
            root_value,
            children.clone(),
        )
        .unwrap();
        assert_tree_invariants(&store);

        // Immediately after a build, every split is within one element of
        // even, modulo the tie group at the chosen median.
        let rows = store.all_tree_rows().unwrap();
        let root_row = rows.iter().find(|r| r.hash_id == root_id).unwrap();
        let ties_at_median = {
            let mut distances: Vec<u32> = children
                .iter()
                .map(|&(_, v)| hamming::distance(root_value, v))
                .collect();
            distances.sort_unstable();
            let median = distances[distances.len() / 2];
            distances.iter().filter(|&&d| d == median).count() as i64
        };
        assert!(
            (root_row.inner_population - root_row.outer_population).abs() <= ties_at_median,
            "split {}/{} with {} ties",
            root_row.inner_population,
            root_row.outer_population,
            ties_at_median
        );
    }

    #[test]
    fn test_regenerate_branch_skips_the_root() {
        let (store, mut cache) = make_index();
        populate(&store, &mut cache, &scrambled_values(10));
        let root_id = store.root_node_id().unwrap().unwrap();
        let rows_before = store.all_tree_rows().unwrap();

        store.enqueue_branch(root_id).unwrap();
        regenerate_branch(&store, &mut cache, &mut FirstPicker, root_id).unwrap();

        assert_eq!(store.queued_branch_count().unwrap(), 0);
        assert_eq!(store.all_tree_rows().unwrap(), rows_before);
    }

    #[test]
    fn test_regenerate_branch_restores_invariants() {
        let (store, mut cache) = make_index();
        // The increasing-bit-count chain builds a degenerate spine that
        // flags the root; rebuild its first child instead.
        let values: Vec<u64> = (0..24u32).map(|i| (1u64 << i) - 1).collect();
        populate(&store, &mut cache, &values);

        let root_id = store.root_node_id().unwrap().unwrap();
        let rows = store.all_tree_rows().unwrap();
        let root_row = rows.iter().find(|r| r.hash_id == root_id).unwrap();
        let child = root_row.outer_id.unwrap();

        regenerate_branch(&store, &mut cache, &mut FirstPicker, child).unwrap();
        assert_tree_invariants(&store);
        assert_eq!(
            store.all_tree_rows().unwrap().len(),
            values.len(),
            "no nodes lost in the rebuild"
        );
    }

    #[test]
    fn test_regenerate_branch_deletes_orphans() {
        let (store, mut cache) = make_index();
        let values = scrambled_values(20);
        let ids = populate(&store, &mut cache, &values);

        // Unlink one non-root hash and rebuild the branch that holds it.
        let root_id = store.root_node_id().unwrap().unwrap();
        let victim = *ids.iter().find(|&&id| id != root_id).unwrap();
        let file_id = (ids.iter().position(|&id| id == victim).unwrap() + 1) as FileId;
        store.delete_link(file_id, victim).unwrap();
        store.enqueue_branch(victim).unwrap();

        maintain(&store, &mut cache, &mut FirstPicker, &Budget::unbounded()).unwrap();

        assert_eq!(store.queued_branch_count().unwrap(), 0);
        let remaining = store.hash_value_map().unwrap();
        assert!(!remaining.contains_key(&victim), "orphan row must be gone");
        assert_eq!(store.all_tree_rows().unwrap().len(), values.len() - 1);
        assert_tree_invariants(&store);
    }

    #[test]
    fn test_orphaned_root_triggers_full_rebuild() {
        let (store, mut cache) = make_index();
        let values = scrambled_values(6);
        let ids = populate(&store, &mut cache, &values);
        let root_id = store.root_node_id().unwrap().unwrap();
        let file_id = (ids.iter().position(|&id| id == root_id).unwrap() + 1) as FileId;
        store.delete_link(file_id, root_id).unwrap();
        store.enqueue_branch(root_id).unwrap();

        maintain(&store, &mut cache, &mut FirstPicker, &Budget::unbounded()).unwrap();

        assert!(!store.hash_value_map().unwrap().contains_key(&root_id));
        assert_eq!(store.all_tree_rows().unwrap().len(), 5);
        assert_tree_invariants(&store);
        assert_eq!(store.queued_branch_count().unwrap(), 0);
    }

    #[test]
    fn test_missing_parent_clears_queue_and_recovers() {
        let (store, mut cache) = make_index();
        let a = store.insert_hash_value(1).unwrap();
        let b = store.insert_hash_value(2).unwrap();
        store.insert_link(1, a).unwrap();
        store.insert_link(2, b).unwrap();
        // b claims a parent that has no tree row.
        store
            .replace_node_rows(&[NodeRow {
                hash_id: b,
                parent_id: Some(999),
                radius: None,
                inner_id: None,
                inner_population: 0,
                outer_id: None,
                outer_population: 0,
            }])
            .unwrap();
        store.enqueue_branch(b).unwrap();
        store.enqueue_branch(777).unwrap();

        regenerate_branch(&store, &mut cache, &mut FirstPicker, b).unwrap();
        assert_eq!(store.queued_branch_count().unwrap(), 0);
    }

    #[test]
    fn test_maintain_stops_on_expired_budget() {
        let (store, mut cache) = make_index();
        populate(&store, &mut cache, &scrambled_values(8));
        store.enqueue_branch(store.root_node_id().unwrap().unwrap()).unwrap();

        let budget = Budget::with_deadline(std::time::Duration::ZERO);
        maintain(&store, &mut cache, &mut FirstPicker, &budget).unwrap();
        assert_eq!(store.queued_branch_count().unwrap(), 1, "no work done");
    }

    #[test]
    fn test_maintain_clears_stale_queue_entries() {
        let (store, mut cache) = make_index();
        store.enqueue_branch(12345).unwrap();

        maintain(&store, &mut cache, &mut FirstPicker, &Budget::unbounded()).unwrap();
        assert_eq!(store.queued_branch_count().unwrap(), 0);
    }

    #[test]
    fn test_regenerate_tree_prunes_and_rebuilds() {
        let (store, mut cache) = make_index();
        let values = scrambled_values(30);
        let ids = populate(&store, &mut cache, &values);
        // Unlink a third of them without queueing anything.
        for (i, &id) in ids.iter().enumerate().filter(|(i, _)| i % 3 == 0) {
            store.delete_link(i as FileId + 1, id).unwrap();
        }

        regenerate_tree(&store, &mut cache, &mut FirstPicker).unwrap();

        assert_tree_invariants(&store);
        let remaining = store.hash_value_map().unwrap();
        assert_eq!(remaining.len(), 20);
        assert_eq!(store.all_tree_rows().unwrap().len(), 20);
        assert_eq!(store.queued_branch_count().unwrap(), 0);
    }

    #[test]
    fn test_regenerate_tree_on_empty_index() {
        let (store, mut cache) = make_index();
        regenerate_tree(&store, &mut cache, &mut FirstPicker).unwrap();
        assert!(store.all_tree_rows().unwrap().is_empty());
    }

    #[test]
    fn test_maintenance_due_threshold() {
        let (store, _) = make_index();
        for file_id in 0..99 {
            store.reset_watermark(file_id).unwrap();
        }
        assert!(!maintenance_due(&store, 8).unwrap());

        store.reset_watermark(99).unwrap();
        assert!(maintenance_due(&store, 8).unwrap());
    }
}
