pub mod maintenance;
pub mod root;

use std::collections::HashMap;

use crate::cache::NodeCache;
use crate::domain::{FileId, HashId};
use crate::error::Result;
use crate::hamming;
use crate::store::Store;

/// A branch only qualifies for rebalancing once it holds more than this many
/// descendants.
const REBALANCE_POPULATION: i64 = 16;

/// Smaller-side over larger-side population ratio below which a branch is
/// considered unbalanced.
const REBALANCE_RATIO: f64 = 0.5;

/// Insert a freshly-registered hash as a new leaf.
///
/// Descends from the root, bumping the chosen side's population counter on
/// every ancestor visited, and attaches the leaf at the first empty slot on
/// its path. Attaching into an empty inner slot sets that ancestor's radius
/// to the attach distance. Only the first (eldest) unbalanced ancestor on
/// the path is enqueued for regeneration — rebuilding it covers any deeper
/// imbalance too.
pub(crate) fn add_leaf(
    store: &Store,
    cache: &mut NodeCache,
    hash_id: HashId,
    value: u64,
) -> Result<()> {
    let mut parent_id = None;

    if let Some(root_id) = store.root_node_id()? {
        let mut ancestors_inside: Vec<HashId> = Vec::new();
        let mut ancestors_outside: Vec<HashId> = Vec::new();
        let mut an_ancestor_is_unbalanced = false;

        let mut next_ancestor = Some(root_id);
        while let Some(ancestor_id) = next_ancestor {
            let Some(ancestor) = store.descent_node(ancestor_id)? else {
                break;
            };
            let distance = hamming::distance(value, ancestor.value);

            let went_inside = match ancestor.radius {
                None => true,
                Some(radius) => distance <= radius,
            };

            if went_inside {
                ancestors_inside.push(ancestor_id);
                next_ancestor = ancestor.inner_id;
                if ancestor.inner_id.is_none() {
                    store.attach_inner(ancestor_id, hash_id, distance)?;
                    parent_id = Some(ancestor_id);
                }
            } else {
                ancestors_outside.push(ancestor_id);
                next_ancestor = ancestor.outer_id;
                if ancestor.outer_id.is_none() {
                    store.attach_outer(ancestor_id, hash_id)?;
                    parent_id = Some(ancestor_id);
                }
            }

            let (inner_population, outer_population) = if went_inside {
                (ancestor.inner_population + 1, ancestor.outer_population)
            } else {
                (ancestor.inner_population, ancestor.outer_population + 1)
            };

            if !an_ancestor_is_unbalanced
                && inner_population + outer_population > REBALANCE_POPULATION
            {
                let larger = inner_population.max(outer_population);
                let smaller = inner_population.min(outer_population);
                if (smaller as f64) / (larger as f64) < REBALANCE_RATIO {
                    store.enqueue_branch(ancestor_id)?;
                    an_ancestor_is_unbalanced = true;
                }
            }
        }

        store.bump_inner_populations(&ancestors_inside)?;
        store.bump_outer_populations(&ancestors_outside)?;

        cache.invalidate(ancestors_inside);
        cache.invalidate(ancestors_outside);
    }

    store.insert_leaf_row(hash_id, parent_id)?;
    cache.invalidate([hash_id]);
    Ok(())
}

/// Range search: every stored hash id within `max_distance` of any query
/// value, mapped to the smallest distance found.
///
/// Traverses breadth-first with an explicit frontier, batch-populating the
/// node cache per level. Frontier ids the cache cannot resolve (a broken
/// branch) are silently skipped rather than failing the search.
pub(crate) fn range_search(
    store: &Store,
    cache: &mut NodeCache,
    queries: &[u64],
    max_distance: u32,
) -> Result<HashMap<HashId, u32>> {
    let mut matches: HashMap<HashId, u32> = HashMap::new();

    let Some(root_id) = cache.root(store)? else {
        return Ok(matches);
    };

    let mut num_cycles = 0u64;
    let mut nodes_searched = 0u64;

    for &query in queries {
        let mut frontier = vec![root_id];

        while !frontier.is_empty() {
            num_cycles += 1;
            nodes_searched += frontier.len() as u64;

            cache.populate(store, &frontier)?;

            let mut next_frontier = Vec::new();
            for node_id in frontier {
                let Some(node) = cache.get(node_id) else {
                    continue;
                };

                let distance = hamming::distance(query, node.value);
                if distance <= max_distance {
                    matches
                        .entry(node_id)
                        .and_modify(|d| *d = (*d).min(distance))
                        .or_insert(distance);
                }

                // Two spheres: the node's (its radius) and the query's
                // (max_distance), centers separated by `distance`. Visit a
                // side only if the query sphere can intersect it.
                if let Some(radius) = node.radius {
                    if let Some(inner_id) = node.inner_id {
                        let spheres_disjoint = distance > radius.saturating_add(max_distance);
                        if !spheres_disjoint {
                            next_frontier.push(inner_id);
                        }
                    }
                    if let Some(outer_id) = node.outer_id {
                        let query_inside_node = distance.saturating_add(max_distance) <= radius;
                        if !query_inside_node {
                            next_frontier.push(outer_id);
                        }
                    }
                }
            }
            frontier = next_frontier;
        }
    }

    log::debug!(
        "similarity search touched {nodes_searched} nodes over {num_cycles} cycles, \
         {} matches",
        matches.len()
    );

    Ok(matches)
}

/// Map matched hash ids to file ids, keeping the smallest distance per file
/// (files can own several hashes, and hashes can belong to several files).
pub(crate) fn resolve_file_hits(
    store: &Store,
    hash_distances: &HashMap<HashId, u32>,
) -> Result<HashMap<FileId, u32>> {
    let hash_ids: Vec<HashId> = hash_distances.keys().copied().collect();
    let mut file_distances: HashMap<FileId, u32> = HashMap::new();
    for (hash_id, file_id) in store.file_links_for_hashes(&hash_ids)? {
        let distance = hash_distances[&hash_id];
        file_distances
            .entry(file_id)
            .and_modify(|d| *d = (*d).min(distance))
            .or_insert(distance);
    }
    Ok(file_distances)
}

/// All similar files for one file: the file itself at distance 0, its exact
/// pixel duplicates at distance 0, and either exact shared-hash matches
/// (`max_distance == 0`) or a tree search over all of the file's hashes.
pub(crate) fn search_file_hits(
    store: &Store,
    cache: &mut NodeCache,
    file_id: FileId,
    max_distance: u32,
) -> Result<HashMap<FileId, u32>> {
    let mut hits: HashMap<FileId, u32> = HashMap::new();
    hits.insert(file_id, 0);

    if let Some(pixel_hash_id) = store.pixel_hash_id_for_file(file_id)? {
        for duplicate in store.files_with_pixel_hash(pixel_hash_id)? {
            hits.insert(duplicate, 0);
        }
    }

    let hash_ids = store.hash_ids_for_file(file_id)?;
    if max_distance == 0 {
        for (_, other_file) in store.file_links_for_hashes(&hash_ids)? {
            hits.insert(other_file, 0);
        }
    } else {
        let values: Vec<u64> = store
            .hash_values(&hash_ids)?
            .into_iter()
            .map(|(_, value)| value)
            .collect();
        if !values.is_empty() {
            let hash_hits = range_search(store, cache, &values, max_distance)?;
            for (other_file, distance) in resolve_file_hits(store, &hash_hits)? {
                hits.entry(other_file)
                    .and_modify(|d| *d = (*d).min(distance))
                    .or_insert(distance);
            }
        }
    }

    Ok(hits)
}
