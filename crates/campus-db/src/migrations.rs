//! App database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only;
//! a database written by a newer client is refused rather than downgraded.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    if current_version == 0 {
        tracing::info!("Initializing app database schema v1");
        conn.execute_batch(schema::SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1u32)?;
    }

    let from = current_version.max(1);
    for version in (from + 1)..=SCHEMA_VERSION {
        tracing::info!("Running app database migration to v{version}");
        run_migration(conn, version)?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => {
            conn.execute_batch(schema::MIGRATION_V2)?;
            Ok(())
        }
        _ => Err(DbError::Migration(format!(
            "Unknown migration version: {version}"
        ))),
    }
}
