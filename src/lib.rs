//! A persistent similarity index for 64-bit perceptual hashes.
//!
//! Files (identified by caller-supplied integer ids) are associated with
//! perceptual-hash values; the index maintains a vantage-point tree over the
//! distinct values so "everything within Hamming distance D" queries prune
//! most of the stored set, plus an exact pixel-hash side index for
//! identical-content duplicates. Skew from online inserts and deferred
//! deletes is repaired by background branch regeneration under a caller
//! time budget, and a per-file watermark drives incremental
//! search-wider-over-time duplicate scans.
//!
//! The index assumes a single writer: callers serialize all operations
//! against one [`SimilarityIndex`].

mod cache;
pub mod domain;
pub mod error;
pub mod hamming;
mod store;
mod tree;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use cache::NodeCache;
use store::Store;

pub use domain::{Budget, FileId, HashId, IndexStats, PotentialPair, ScanReport, SearchHit};
pub use error::{Error, Result};
pub use tree::root::{RootPicker, SampledRootPicker};

/// The main entry point: a perceptual-similarity search index over SQLite.
pub struct SimilarityIndex {
    store: Store,
    cache: NodeCache,
    picker: Box<dyn RootPicker>,
}

impl SimilarityIndex {
    /// Open or create an index database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: Store::open(path)?,
            cache: NodeCache::new(),
            picker: Box::new(SampledRootPicker),
        })
    }

    /// Open an in-memory index (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            cache: NodeCache::new(),
            picker: Box::new(SampledRootPicker),
        })
    }

    /// Replace the root-selection heuristic, e.g. with a deterministic
    /// picker for reproducible tree shapes in tests.
    pub fn with_root_picker(mut self, picker: Box<dyn RootPicker>) -> Self {
        self.picker = picker;
        self
    }

    // ── Association ──────────────────────────────────────────────────

    /// Associate a file with perceptual-hash values, registering (and
    /// tree-inserting) values never seen before. Returns the hash ids now
    /// linked. Idempotent; whenever any link is actually new, the file's
    /// watermark resets so the next scan picks it up again.
    pub fn associate(&mut self, file_id: FileId, values: &[u64]) -> Result<BTreeSet<HashId>> {
        let tx = self.store.begin()?;
        match associate_inner(&self.store, &mut self.cache, file_id, values) {
            Ok(hash_ids) => {
                tx.commit()?;
                Ok(hash_ids)
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    /// Remove links between a file and hash ids. Hash ids left with no link
    /// at all are queued for deferred deletion by branch maintenance — never
    /// deleted here, so a concurrent-looking search never loses a node
    /// mid-traversal.
    pub fn disassociate(&mut self, file_id: FileId, hash_ids: &[HashId]) -> Result<()> {
        let tx = self.store.begin()?;
        match disassociate_inner(&self.store, file_id, hash_ids) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    /// Replace a file's full hash set: disassociate everything current,
    /// then associate the new values.
    pub fn set_perceptual_hashes(
        &mut self,
        file_id: FileId,
        values: &[u64],
    ) -> Result<BTreeSet<HashId>> {
        let tx = self.store.begin()?;
        let result = (|| {
            let current = self.store.hash_ids_for_file(file_id)?;
            if !current.is_empty() {
                disassociate_inner(&self.store, file_id, &current)?;
            }
            associate_inner(&self.store, &mut self.cache, file_id, values)
        })();
        match result {
            Ok(hash_ids) => {
                tx.commit()?;
                Ok(hash_ids)
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    /// Remove a file from the similarity system entirely: all hash links
    /// plus its watermark.
    pub fn stop_searching_file(&mut self, file_id: FileId) -> Result<()> {
        let tx = self.store.begin()?;
        let result = (|| {
            let current = self.store.hash_ids_for_file(file_id)?;
            disassociate_inner(&self.store, file_id, &current)?;
            self.store.delete_watermark(file_id)
        })();
        match result {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    // ── Pixel duplicates ─────────────────────────────────────────────

    /// Set a file's pixel hash (at most one per file; replaces any previous
    /// value). When another file already carries the same pixel hash, the
    /// file's watermark resets so the new exact duplicate is reported.
    pub fn set_pixel_hash(&mut self, file_id: FileId, value: &[u8]) -> Result<()> {
        let tx = self.store.begin()?;
        let result = (|| {
            self.store.clear_pixel_link(file_id)?;
            let pixel_hash_id = match self.store.pixel_hash_id_for_value(value)? {
                Some(id) => id,
                None => self.store.insert_pixel_hash(value)?,
            };
            self.store.set_pixel_link(file_id, pixel_hash_id)?;
            if self.store.count_files_with_pixel_hash(pixel_hash_id)? > 1 {
                self.store.reset_watermark(file_id)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    pub fn clear_pixel_hash(&mut self, file_id: FileId) -> Result<()> {
        self.store.clear_pixel_link(file_id)
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Every file within `max_distance` of any of the given values, with the
    /// smallest distance found per file. `max_distance == 0` is a pure
    /// registry lookup with no tree traversal; unknown values simply match
    /// nothing.
    pub fn search_perceptual_hashes(
        &mut self,
        values: &[u64],
        max_distance: u32,
    ) -> Result<Vec<SearchHit>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let hash_distances: HashMap<HashId, u32> = if max_distance == 0 {
            let mut exact = HashMap::new();
            for &value in values {
                if let Some(hash_id) = self.store.hash_id_for_value(value)? {
                    exact.insert(hash_id, 0);
                }
            }
            exact
        } else {
            tree::range_search(&self.store, &mut self.cache, values, max_distance)?
        };

        let file_distances = tree::resolve_file_hits(&self.store, &hash_distances)?;
        Ok(sorted_hits(file_distances))
    }

    /// Every file similar to the given file: itself at distance 0, exact
    /// pixel duplicates at distance 0, and perceptual matches over all of
    /// its hash values.
    pub fn search_file(&mut self, file_id: FileId, max_distance: u32) -> Result<Vec<SearchHit>> {
        let hits = tree::search_file_hits(&self.store, &mut self.cache, file_id, max_distance)?;
        Ok(sorted_hits(hits))
    }

    /// Exact pixel-hash lookup; every hit is at distance 0.
    pub fn search_pixel_hashes(&mut self, values: &[&[u8]]) -> Result<Vec<SearchHit>> {
        let mut files: BTreeSet<FileId> = BTreeSet::new();
        for &value in values {
            if let Some(pixel_hash_id) = self.store.pixel_hash_id_for_value(value)? {
                files.extend(self.store.files_with_pixel_hash(pixel_hash_id)?);
            }
        }
        Ok(files
            .into_iter()
            .map(|file_id| SearchHit {
                file_id,
                distance: 0,
            })
            .collect())
    }

    // ── Watermarks ───────────────────────────────────────────────────

    /// Whether the file is tracked by the similarity system at all.
    pub fn file_is_in_system(&self, file_id: FileId) -> Result<bool> {
        self.store.file_in_system(file_id)
    }

    /// Clear the searched-distance watermark for the given files, forcing
    /// the next scan to revisit them. Files not in the system are ignored.
    pub fn reset_search(&mut self, file_ids: &[FileId]) -> Result<()> {
        self.store.null_watermarks(file_ids)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Whether enough files are waiting below `search_distance` to make a
    /// background scan worthwhile.
    pub fn maintenance_due(&self, search_distance: u32) -> Result<bool> {
        tree::maintenance::maintenance_due(&self.store, search_distance)
    }

    /// Drain the branch-regeneration queue, heaviest branch first, one
    /// transaction per branch, until the queue is empty or the budget
    /// expires. Resumable: whatever remains queued is picked up next call.
    pub fn maintain_tree(&mut self, budget: &Budget) -> Result<()> {
        tree::maintenance::maintain(
            &self.store,
            &mut self.cache,
            self.picker.as_mut(),
            budget,
        )
    }

    /// Full rebuild, used for repair: prune unreferenced hash rows and
    /// regenerate the entire tree.
    pub fn regenerate_tree(&mut self) -> Result<()> {
        let tx = self.store.begin()?;
        match tree::maintenance::regenerate_tree(
            &self.store,
            &mut self.cache,
            self.picker.as_mut(),
        ) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                drop(tx);
                self.cache.clear();
                Err(err)
            }
        }
    }

    /// Search every file whose watermark sits below `search_distance`,
    /// forwarding candidate pairs to `on_pair` and stamping watermarks as it
    /// goes. Stops early on budget expiry and resumes cleanly next call.
    pub fn scan_for_potential_duplicates(
        &mut self,
        search_distance: u32,
        budget: &Budget,
        on_pair: &mut dyn FnMut(PotentialPair),
    ) -> Result<ScanReport> {
        tree::maintenance::scan_for_potential_duplicates(
            &self.store,
            &mut self.cache,
            search_distance,
            budget,
            on_pair,
        )
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Histogram of searched-distance watermarks (`None` = never searched).
    pub fn maintenance_status(&self) -> Result<BTreeMap<Option<u32>, usize>> {
        Ok(self.store.watermark_histogram()?.into_iter().collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let (hash_count, tree_node_count, queued_branch_count, tracked_file_count) =
            self.store.counts()?;
        Ok(IndexStats {
            hash_count,
            tree_node_count,
            queued_branch_count,
            tracked_file_count,
        })
    }
}

fn associate_inner(
    store: &Store,
    cache: &mut NodeCache,
    file_id: FileId,
    values: &[u64],
) -> Result<BTreeSet<HashId>> {
    let mut hash_ids = BTreeSet::new();
    for &value in values {
        let hash_id = match store.hash_id_for_value(value)? {
            Some(id) => id,
            None => {
                let id = store.insert_hash_value(value)?;
                tree::add_leaf(store, cache, id, value)?;
                id
            }
        };
        hash_ids.insert(hash_id);
    }

    let mut inserted_any = false;
    for &hash_id in &hash_ids {
        if store.insert_link(file_id, hash_id)? {
            inserted_any = true;
        }
    }
    if inserted_any {
        store.reset_watermark(file_id)?;
    }

    Ok(hash_ids)
}

fn disassociate_inner(store: &Store, file_id: FileId, hash_ids: &[HashId]) -> Result<()> {
    for &hash_id in hash_ids {
        store.delete_link(file_id, hash_id)?;
    }
    let still_linked = store.linked_hash_ids(hash_ids)?;
    for &hash_id in hash_ids {
        if !still_linked.contains(&hash_id) {
            store.enqueue_branch(hash_id)?;
        }
    }
    Ok(())
}

fn sorted_hits(file_distances: HashMap<FileId, u32>) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = file_distances
        .into_iter()
        .map(|(file_id, distance)| SearchHit { file_id, distance })
        .collect();
    hits.sort_unstable_by_key(|hit| (hit.distance, hit.file_id));
    hits
}
