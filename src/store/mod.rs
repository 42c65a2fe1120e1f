pub mod schema;

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, Transaction};

use crate::cache::CachedNode;
use crate::domain::{FileId, HashId};
use crate::error::Result;

/// Chunk size for `IN (...)` queries, kept under SQLite's variable limit.
const IN_CHUNK: usize = 500;

/// One row of the `vptree` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeRow {
    pub hash_id: HashId,
    pub parent_id: Option<HashId>,
    pub radius: Option<u32>,
    pub inner_id: Option<HashId>,
    pub inner_population: i64,
    pub outer_id: Option<HashId>,
    pub outer_population: i64,
}

/// The fields of a node read during insertion descent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DescentNode {
    pub value: u64,
    pub radius: Option<u32>,
    pub inner_id: Option<HashId>,
    pub inner_population: i64,
    pub outer_id: Option<HashId>,
    pub outer_population: i64,
}

/// SQLite-backed storage for the similarity index: the hash registry,
/// file↔hash links, VP-tree nodes, the branch-regeneration queue, the
/// pixel-duplicate index, and per-file search watermarks.
pub(crate) struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the index database at the given path with WAL mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Begin a transaction that rolls back on drop unless committed.
    /// `unchecked` because the connection is behind a shared borrow; the
    /// single-writer discipline means no second transaction can start.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Hash registry ────────────────────────────────────────────────

    pub fn hash_id_for_value(&self, value: u64) -> Result<Option<HashId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM perceptual_hashes WHERE value = ?1",
                params![value as i64],
                |row| row.get(0),
            )
            .ok();
        Ok(id)
    }

    pub fn insert_hash_value(&self, value: u64) -> Result<HashId> {
        self.conn.execute(
            "INSERT INTO perceptual_hashes (value) VALUES (?1)",
            params![value as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Resolve `(id, value)` pairs for the given hash ids. Unknown ids are
    /// silently absent from the result.
    pub fn hash_values(&self, hash_ids: &[HashId]) -> Result<Vec<(HashId, u64)>> {
        let mut out = Vec::with_capacity(hash_ids.len());
        for chunk in hash_ids.chunks(IN_CHUNK) {
            let placeholders = placeholders(chunk.len());
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, value FROM perceptual_hashes WHERE id IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    pub fn all_hash_nodes(&self) -> Result<Vec<(HashId, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, value FROM perceptual_hashes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_hashes(&self, hash_ids: &[HashId]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("DELETE FROM perceptual_hashes WHERE id = ?1")?;
        for &id in hash_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    /// Delete every hash row with no remaining file link.
    pub fn delete_unlinked_hashes(&self) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM perceptual_hashes
             WHERE id NOT IN (SELECT DISTINCT hash_id FROM file_hash_links)",
            [],
        )?;
        Ok(count)
    }

    // ── File ↔ hash links ────────────────────────────────────────────

    /// Insert a link row. Returns true if the row was actually inserted
    /// (false when it already existed).
    pub fn insert_link(&self, file_id: FileId, hash_id: HashId) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO file_hash_links (file_id, hash_id) VALUES (?1, ?2)",
            params![file_id, hash_id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_link(&self, file_id: FileId, hash_id: HashId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM file_hash_links WHERE file_id = ?1 AND hash_id = ?2",
            params![file_id, hash_id],
        )?;
        Ok(())
    }

    pub fn hash_ids_for_file(&self, file_id: FileId) -> Result<Vec<HashId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT hash_id FROM file_hash_links WHERE file_id = ?1")?;
        let ids = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Which of the given hash ids still have at least one file link.
    pub fn linked_hash_ids(&self, hash_ids: &[HashId]) -> Result<HashSet<HashId>> {
        let mut out = HashSet::new();
        for chunk in hash_ids.chunks(IN_CHUNK) {
            let placeholders = placeholders(chunk.len());
            let mut stmt = self.conn.prepare(&format!(
                "SELECT DISTINCT hash_id FROM file_hash_links WHERE hash_id IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    /// All `(hash_id, file_id)` link rows for the given hash ids.
    pub fn file_links_for_hashes(&self, hash_ids: &[HashId]) -> Result<Vec<(HashId, FileId)>> {
        let mut out = Vec::new();
        for chunk in hash_ids.chunks(IN_CHUNK) {
            let placeholders = placeholders(chunk.len());
            let mut stmt = self.conn.prepare(&format!(
                "SELECT hash_id, file_id FROM file_hash_links WHERE hash_id IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    // ── VP-tree nodes ────────────────────────────────────────────────

    pub fn root_node_id(&self) -> Result<Option<HashId>> {
        let id = self
            .conn
            .query_row(
                "SELECT hash_id FROM vptree WHERE parent_id IS NULL",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(id)
    }

    pub fn descent_node(&self, hash_id: HashId) -> Result<Option<DescentNode>> {
        let node = self
            .conn
            .query_row(
                "SELECT value, radius, inner_id, inner_population, outer_id, outer_population
                 FROM vptree JOIN perceptual_hashes ON perceptual_hashes.id = vptree.hash_id
                 WHERE vptree.hash_id = ?1",
                params![hash_id],
                |row| {
                    Ok(DescentNode {
                        value: row.get::<_, i64>(0)? as u64,
                        radius: row.get(1)?,
                        inner_id: row.get(2)?,
                        inner_population: row.get(3)?,
                        outer_id: row.get(4)?,
                        outer_population: row.get(5)?,
                    })
                },
            )
            .ok();
        Ok(node)
    }

    /// Attaching into an empty inner slot also sets the ancestor's radius to
    /// the attach distance — this is what turns a leaf into an internal node.
    pub fn attach_inner(&self, ancestor_id: HashId, child_id: HashId, radius: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE vptree SET inner_id = ?1, radius = ?2 WHERE hash_id = ?3",
            params![child_id, radius, ancestor_id],
        )?;
        Ok(())
    }

    pub fn attach_outer(&self, ancestor_id: HashId, child_id: HashId) -> Result<()> {
        self.conn.execute(
            "UPDATE vptree SET outer_id = ?1 WHERE hash_id = ?2",
            params![child_id, ancestor_id],
        )?;
        Ok(())
    }

    pub fn bump_inner_populations(&self, hash_ids: &[HashId]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE vptree SET inner_population = inner_population + 1 WHERE hash_id = ?1",
        )?;
        for &id in hash_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn bump_outer_populations(&self, hash_ids: &[HashId]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE vptree SET outer_population = outer_population + 1 WHERE hash_id = ?1",
        )?;
        for &id in hash_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn insert_leaf_row(&self, hash_id: HashId, parent_id: Option<HashId>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO vptree
             (hash_id, parent_id, radius, inner_id, inner_population, outer_id, outer_population)
             VALUES (?1, ?2, NULL, NULL, 0, NULL, 0)",
            params![hash_id, parent_id],
        )?;
        Ok(())
    }

    /// `None` = not in the tree at all; `Some(None)` = in the tree as root.
    pub fn node_parent(&self, hash_id: HashId) -> Result<Option<Option<HashId>>> {
        let parent = self
            .conn
            .query_row(
                "SELECT parent_id FROM vptree WHERE hash_id = ?1",
                params![hash_id],
                |row| row.get(0),
            )
            .ok();
        Ok(parent)
    }

    /// `None` = the parent row itself is missing (tree damage).
    pub fn parent_inner_id(&self, parent_id: HashId) -> Result<Option<Option<HashId>>> {
        let inner = self
            .conn
            .query_row(
                "SELECT inner_id FROM vptree WHERE hash_id = ?1",
                params![parent_id],
                |row| row.get(0),
            )
            .ok();
        Ok(inner)
    }

    /// Collect the whole subtree rooted at `hash_id`, including its value.
    /// The recursive CTE uses UNION, not UNION ALL, so an accidentally
    /// cyclic branch terminates instead of looping forever.
    pub fn subtree_nodes(&self, hash_id: HashId) -> Result<Vec<(HashId, u64)>> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE branch(branch_id) AS (
                 SELECT ?1
                 UNION
                 SELECT hash_id FROM vptree JOIN branch ON vptree.parent_id = branch.branch_id
             )
             SELECT id, value FROM branch
             JOIN perceptual_hashes ON perceptual_hashes.id = branch.branch_id",
        )?;
        let rows = stmt
            .query_map(params![hash_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_nodes(&self, hash_ids: &[HashId]) -> Result<()> {
        let mut stmt = self.conn.prepare("DELETE FROM vptree WHERE hash_id = ?1")?;
        for &id in hash_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn set_parent_inner(
        &self,
        parent_id: HashId,
        child_id: Option<HashId>,
        population: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE vptree SET inner_id = ?1, inner_population = ?2 WHERE hash_id = ?3",
            params![child_id, population, parent_id],
        )?;
        Ok(())
    }

    pub fn set_parent_outer(
        &self,
        parent_id: HashId,
        child_id: Option<HashId>,
        population: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE vptree SET outer_id = ?1, outer_population = ?2 WHERE hash_id = ?3",
            params![child_id, population, parent_id],
        )?;
        Ok(())
    }

    /// Write a whole regenerated branch in one batch.
    pub fn replace_node_rows(&self, rows: &[NodeRow]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR REPLACE INTO vptree
             (hash_id, parent_id, radius, inner_id, inner_population, outer_id, outer_population)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.hash_id,
                row.parent_id,
                row.radius,
                row.inner_id,
                row.inner_population,
                row.outer_id,
                row.outer_population,
            ])?;
        }
        Ok(())
    }

    pub fn clear_tree(&self) -> Result<()> {
        self.conn.execute("DELETE FROM vptree", [])?;
        Ok(())
    }

    /// Node contents for the search cache, for the given ids. Ids without a
    /// tree row are absent from the result.
    pub fn tree_nodes(&self, hash_ids: &[HashId]) -> Result<Vec<(HashId, CachedNode)>> {
        let mut out = Vec::with_capacity(hash_ids.len());
        for chunk in hash_ids.chunks(IN_CHUNK) {
            let placeholders = placeholders(chunk.len());
            let mut stmt = self.conn.prepare(&format!(
                "SELECT hash_id, value, radius, inner_id, outer_id
                 FROM vptree JOIN perceptual_hashes ON perceptual_hashes.id = vptree.hash_id
                 WHERE hash_id IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        CachedNode {
                            value: row.get::<_, i64>(1)? as u64,
                            radius: row.get(2)?,
                            inner_id: row.get(3)?,
                            outer_id: row.get(4)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    // ── Branch-regeneration queue ────────────────────────────────────

    pub fn enqueue_branch(&self, hash_id: HashId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO branch_regen_queue (hash_id) VALUES (?1)",
            params![hash_id],
        )?;
        Ok(())
    }

    pub fn dequeue_branch(&self, hash_id: HashId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM branch_regen_queue WHERE hash_id = ?1",
            params![hash_id],
        )?;
        Ok(())
    }

    pub fn dequeue_branches(&self, hash_ids: &[HashId]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("DELETE FROM branch_regen_queue WHERE hash_id = ?1")?;
        for &id in hash_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn clear_branch_queue(&self) -> Result<()> {
        self.conn.execute("DELETE FROM branch_regen_queue", [])?;
        Ok(())
    }

    pub fn queued_branch_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM branch_regen_queue", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// The queued id whose branch holds the most nodes, so one regeneration
    /// clears as much deeper-queued work as possible. Queued ids that no
    /// longer join to the tree are invisible here.
    pub fn heaviest_queued_branch(&self) -> Result<Option<HashId>> {
        let id = self
            .conn
            .query_row(
                "SELECT q.hash_id FROM branch_regen_queue q
                 JOIN vptree t ON t.hash_id = q.hash_id
                 ORDER BY t.inner_population + t.outer_population DESC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(id)
    }

    // ── Pixel-duplicate index ────────────────────────────────────────

    pub fn pixel_hash_id_for_value(&self, value: &[u8]) -> Result<Option<HashId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM pixel_hashes WHERE value = ?1",
                params![value],
                |row| row.get(0),
            )
            .ok();
        Ok(id)
    }

    pub fn insert_pixel_hash(&self, value: &[u8]) -> Result<HashId> {
        self.conn.execute(
            "INSERT INTO pixel_hashes (value) VALUES (?1)",
            params![value],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_pixel_link(&self, file_id: FileId, pixel_hash_id: HashId) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pixel_hash_links (file_id, pixel_hash_id) VALUES (?1, ?2)",
            params![file_id, pixel_hash_id],
        )?;
        Ok(())
    }

    pub fn clear_pixel_link(&self, file_id: FileId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pixel_hash_links WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    pub fn pixel_hash_id_for_file(&self, file_id: FileId) -> Result<Option<HashId>> {
        let id = self
            .conn
            .query_row(
                "SELECT pixel_hash_id FROM pixel_hash_links WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .ok();
        Ok(id)
    }

    pub fn files_with_pixel_hash(&self, pixel_hash_id: HashId) -> Result<Vec<FileId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_id FROM pixel_hash_links WHERE pixel_hash_id = ?1")?;
        let ids = stmt
            .query_map(params![pixel_hash_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn count_files_with_pixel_hash(&self, pixel_hash_id: HashId) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM pixel_hash_links WHERE pixel_hash_id = ?1",
            params![pixel_hash_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Search watermarks ────────────────────────────────────────────

    /// Re-open a file for scanning: watermark present, distance NULL.
    pub fn reset_watermark(&self, file_id: FileId) -> Result<()> {
        self.conn.execute(
            "REPLACE INTO search_watermarks (file_id, searched_distance) VALUES (?1, NULL)",
            params![file_id],
        )?;
        Ok(())
    }

    /// Null out existing watermarks. Files not in the system are untouched.
    pub fn null_watermarks(&self, file_ids: &[FileId]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE search_watermarks SET searched_distance = NULL WHERE file_id = ?1",
        )?;
        for &id in file_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn set_searched_distance(&self, file_id: FileId, distance: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE search_watermarks SET searched_distance = ?1 WHERE file_id = ?2",
            params![distance, file_id],
        )?;
        Ok(())
    }

    pub fn delete_watermark(&self, file_id: FileId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM search_watermarks WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    /// Watermark membership is the authoritative "is this file in the
    /// similarity system" test.
    pub fn file_in_system(&self, file_id: FileId) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM search_watermarks WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .ok();
        Ok(row.is_some())
    }

    pub fn files_below_watermark(&self, distance: u32, limit: usize) -> Result<Vec<FileId>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id FROM search_watermarks
             WHERE searched_distance IS NULL OR searched_distance < ?1
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![distance, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Count files below the watermark, probing at most `probe_limit` rows.
    pub fn count_files_below_watermark(&self, distance: u32, probe_limit: usize) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM search_watermarks
                 WHERE searched_distance IS NULL OR searched_distance < ?1
                 LIMIT ?2
             )",
            params![distance, probe_limit as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn watermark_histogram(&self) -> Result<Vec<(Option<u32>, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT searched_distance, COUNT(*) FROM search_watermarks
             GROUP BY searched_distance",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Stats / config ───────────────────────────────────────────────

    pub fn counts(&self) -> Result<(usize, usize, usize, usize)> {
        let (hashes, nodes, queued, files) = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM perceptual_hashes),
                (SELECT COUNT(*) FROM vptree),
                (SELECT COUNT(*) FROM branch_regen_queue),
                (SELECT COUNT(*) FROM search_watermarks)",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, i64>(2)? as usize,
                    row.get::<_, i64>(3)? as usize,
                ))
            },
        )?;
        Ok((hashes, nodes, queued, files))
    }

    #[allow(dead_code)]
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .ok();
        Ok(value)
    }

    // ── Test access ──────────────────────────────────────────────────

    #[cfg(test)]
    pub fn all_tree_rows(&self) -> Result<Vec<NodeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash_id, parent_id, radius, inner_id, inner_population,
                    outer_id, outer_population
             FROM vptree",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NodeRow {
                    hash_id: row.get(0)?,
                    parent_id: row.get(1)?,
                    radius: row.get(2)?,
                    inner_id: row.get(3)?,
                    inner_population: row.get(4)?,
                    outer_id: row.get(5)?,
                    outer_population: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn hash_value_map(&self) -> Result<std::collections::HashMap<HashId, u64>> {
        Ok(self.all_hash_nodes()?.into_iter().collect())
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}
