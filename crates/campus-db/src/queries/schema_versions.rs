//! Installed site schema versions (per-site database).

use std::collections::HashMap;

use rusqlite::Connection;

use crate::Result;

/// Installed version of a schema.
pub fn get(conn: &Connection, name: &str) -> Result<u32> {
    conn.query_row(
        "SELECT version FROM schema_versions WHERE name = ?1",
        [name],
        |row| row.get(0),
    )
    .map_err(crate::not_found(format!("schema version '{name}'")))
}

/// Every installed schema and its version.
pub fn get_all(conn: &Connection) -> Result<HashMap<String, u32>> {
    let mut stmt = conn.prepare("SELECT name, version FROM schema_versions")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?;

    let mut result = HashMap::new();
    for row in rows {
        let (name, version) = row?;
        result.insert(name, version);
    }
    Ok(result)
}

/// Record the installed version of a schema.
pub fn set(conn: &Connection, name: &str, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_versions (name, version) VALUES (?1, ?2)",
        rusqlite::params![name, version],
    )?;
    Ok(())
}
