use crate::core::error;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_connect(db_path: &str, busy_timeout: Duration) -> Result<Connection, error::MissionError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)
        .map_err(error::MissionError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::MissionError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::MissionError::RusqliteError)?;
    Ok(conn)
}

pub fn engine_db_path(root: &Path) -> PathBuf {
    root.join(schemas::ENGINE_DB_NAME)
}

pub fn initialize_engine_db(root: &Path) -> Result<(), error::MissionError> {
    fs::create_dir_all(root).map_err(error::MissionError::IoError)?;
    let db_path = engine_db_path(root);
    let conn = db_connect(&db_path.to_string_lossy(), DEFAULT_BUSY_TIMEOUT)?;

    for ddl in schemas::ENGINE_DB_DDL {
        conn.execute_batch(ddl)?;
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                params![schemas::ENGINE_SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v == schemas::ENGINE_SCHEMA_VERSION.to_string() => {}
        Some(v) => {
            return Err(error::MissionError::Corrupt(format!(
                "engine.db schema version {} is not supported (expected {})",
                v,
                schemas::ENGINE_SCHEMA_VERSION
            )));
        }
    }

    tracing::debug!(path = %db_path.display(), "engine database ready");
    Ok(())
}
