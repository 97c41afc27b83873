use rusqlite::Connection;

/// Applies the connection PRAGMAs shared by every store handle.
///
/// Read-only handles skip the journal settings, which would require a write.
pub fn configure_connection(conn: &Connection, read_only: bool) -> rusqlite::Result<()> {
    if !read_only {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n",
        )?;
    }
    conn.execute_batch(
        "PRAGMA cache_size = -16000;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}
