//! # campus-db
//!
//! Local storage for the Campus client.
//!
//! There is one application database (`app.db`) holding the site registry
//! and the current-site pointer, plus one database per site holding the
//! tables that features register through [`site_schema::SiteSchema`].
//!
//! - WAL mode, foreign keys enforced
//! - App schema version stored in `PRAGMA user_version`
//! - Site schema versions stored per site in the `schema_versions` table

pub mod migrations;
pub mod queries;
pub mod records;
pub mod schema;
pub mod site_db;
pub mod site_schema;
pub mod table;

use rusqlite::{Connection, ErrorCode};
use std::path::Path;

pub use records::{Filter, Record};
pub use site_db::{SharedConnection, SiteDatabases, StorageLocation};
pub use site_schema::{MigrationReport, SchemaRegistry, SchemaScope, SiteSchema};
pub use table::{ColumnSchema, ColumnType, TableSchema};

/// Current app database schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("schema '{schema}' failed to migrate: {reason}")]
    SchemaMigrationFailed { schema: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase,
            ) => DbError::StorageUnavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => DbError::Constraint(err.to_string()),
            _ => DbError::Sqlite(err),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl DbError {
    /// Whether this is a plain lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Map `QueryReturnedNoRows` to [`DbError::NotFound`].
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> DbError {
    let what = what.into();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(what),
        other => DbError::from(other),
    }
}

/// Open or create the app database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::StorageUnavailable(format!("{}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory app database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open the app database for a storage location.
pub fn open_app(location: &StorageLocation) -> Result<Connection> {
    match location.app_db_path() {
        Some(path) => open(&path),
        None => open_memory(),
    }
}

/// Configure SQLite pragmas.
pub(crate) fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("app.db");
        let conn = open(&path).expect("open");
        drop(conn);
        assert!(path.exists());
    }

    #[test]
    fn test_unopenable_path_is_storage_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"not a directory").expect("write");
        let result = open(&file.join("app.db"));
        assert!(matches!(result, Err(DbError::StorageUnavailable(_))));
    }
}
