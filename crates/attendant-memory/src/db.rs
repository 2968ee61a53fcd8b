use rusqlite::{Connection, Result};

/// Initialise the chunk store. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_chunks_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_chunks (
            rowid       INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            source      TEXT NOT NULL,
            text        TEXT NOT NULL,
            hash        TEXT NOT NULL,
            embedding   BLOB,
            timestamp   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_source ON memory_chunks(source);
        CREATE INDEX IF NOT EXISTS idx_chunks_hash ON memory_chunks(hash);",
    )
}

/// FTS5 virtual table over chunk text for the keyword half of 4.C.
/// content='' (external-content) — synced manually on write, the same
/// pattern `user_memory_fts` used.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(text, content='memory_chunks', content_rowid='rowid');",
    )
}
