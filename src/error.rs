#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index schema is newer than this build: db={db}, code={code}")]
    SchemaTooNew { db: i64, code: i64 },
}

pub type Result<T> = std::result::Result<T, Error>;
