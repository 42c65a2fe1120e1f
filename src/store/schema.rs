use rusqlite::Connection;

use crate::error::{Error, Result};

/// Schema version written by this build. Newer on-disk versions are rejected.
pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS perceptual_hashes (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            value   INTEGER NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS file_hash_links (
            file_id INTEGER NOT NULL,
            hash_id INTEGER NOT NULL REFERENCES perceptual_hashes(id),
            PRIMARY KEY (hash_id, file_id)
        );

        CREATE INDEX IF NOT EXISTS idx_file_hash_links_file ON file_hash_links(file_id);

        CREATE TABLE IF NOT EXISTS vptree (
            hash_id          INTEGER PRIMARY KEY,
            parent_id        INTEGER,
            radius           INTEGER,
            inner_id         INTEGER,
            inner_population INTEGER NOT NULL DEFAULT 0,
            outer_id         INTEGER,
            outer_population INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_vptree_parent ON vptree(parent_id);

        CREATE TABLE IF NOT EXISTS branch_regen_queue (
            hash_id INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS pixel_hashes (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            value   BLOB NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS pixel_hash_links (
            file_id       INTEGER PRIMARY KEY,
            pixel_hash_id INTEGER NOT NULL REFERENCES pixel_hashes(id)
        );

        CREATE INDEX IF NOT EXISTS idx_pixel_hash_links_hash ON pixel_hash_links(pixel_hash_id);

        CREATE TABLE IF NOT EXISTS search_watermarks (
            file_id           INTEGER PRIMARY KEY,
            searched_distance INTEGER
        );

        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let db_version: Option<i64> = conn
        .query_row(
            "SELECT value FROM config WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .ok()
        .and_then(|v| v.parse().ok());

    match db_version {
        None => {
            conn.execute(
                "INSERT INTO config (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(db) if db > SCHEMA_VERSION => Err(Error::SchemaTooNew {
            db,
            code: SCHEMA_VERSION,
        }),
        Some(_) => Ok(()),
    }
}
