pub mod models;
pub mod repositories;
mod schema;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use repositories::{StampRepository, TagRepository};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("a stamp with image path {image_path} is already cataloged")]
    Conflict { image_path: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("Database query error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQL function lower-casing text with Unicode rules. SQLite's own
/// `lower()` and `LIKE` fold ASCII only.
pub(crate) const FOLD_CASE_FN: &str = "fold_case";

/// The catalog's SQLite database. Constructed once and lent to the
/// repositories that need it.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let database = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        database.initialize_schema()?;
        log::info!("Opened catalog database at {}", path.display());
        Ok(database)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let database = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        database.initialize_schema()?;
        Ok(database)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.create_scalar_function(
            FOLD_CASE_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
        )?;
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    /// File backing this database, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn stamps(&self) -> StampRepository<'_> {
        StampRepository::new(self)
    }

    pub fn tags(&self) -> TagRepository<'_> {
        TagRepository::new(self)
    }
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the database stores.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_connection() {
        let database = Database::open_in_memory().unwrap();
        let result: i64 = database
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 1);
        assert!(database.path().is_none());
    }

    #[test]
    fn test_open_creates_parent_and_is_reopenable() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("stampd.db");

        {
            let database = Database::open(&db_path).unwrap();
            assert_eq!(database.path(), Some(db_path.as_path()));
        }
        assert!(db_path.exists());

        // Schema creation is idempotent.
        let database = Database::open(&db_path).unwrap();
        assert_eq!(database.stamps().count().unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let database = Database::open_in_memory().unwrap();
        let enabled: i64 = database
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_timestamp_format_has_microseconds() {
        let formatted = format_timestamp(&now());
        assert!(formatted.ends_with('Z'));
        let fraction = formatted.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), "123456Z".len());
    }
}
