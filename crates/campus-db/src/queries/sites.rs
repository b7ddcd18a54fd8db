//! Site registry query functions (app database).

use campus_types::{SiteConfig, SiteId, SiteInfo};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;

use crate::{DbError, Result};

/// A stored site record.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteRow {
    pub id: SiteId,
    pub site_url: String,
    pub token: String,
    pub private_token: String,
    pub info: Option<SiteInfo>,
    pub config: Option<SiteConfig>,
    pub logged_out: bool,
    pub oauth_id: Option<i64>,
}

const COLUMNS: &str = "id, site_url, token, private_token, info, config, logged_out, oauth_id";

/// Insert a site, replacing any record with the same id.
pub fn insert(conn: &Connection, site: &SiteRow) -> Result<()> {
    let info = site.info.as_ref().map(serde_json::to_string).transpose()?;
    let config = site.config.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!("INSERT OR REPLACE INTO sites ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        rusqlite::params![
            site.id.as_str(),
            site.site_url,
            site.token,
            site.private_token,
            info,
            config,
            site.logged_out,
            site.oauth_id,
        ],
    )?;
    Ok(())
}

/// Get a site by id.
pub fn get(conn: &Connection, site_id: &SiteId) -> Result<SiteRow> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM sites WHERE id = ?1"),
        [site_id.as_str()],
        row_to_site,
    )
    .map_err(crate::not_found(format!("site '{site_id}'")))
}

/// First site stored with the given URL.
pub fn get_by_url(conn: &Connection, site_url: &str) -> Result<SiteRow> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM sites WHERE site_url = ?1 LIMIT 1"),
        [site_url],
        row_to_site,
    )
    .map_err(crate::not_found(format!("site with url '{site_url}'")))
}

/// List all stored sites.
pub fn list(conn: &Connection) -> Result<Vec<SiteRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM sites ORDER BY id"))?;
    let rows = stmt
        .query_map([], row_to_site)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of all stored sites.
pub fn list_ids(conn: &Connection) -> Result<Vec<SiteId>> {
    ids_where(conn, "SELECT id FROM sites ORDER BY id")
}

/// Ids of sites that are not logged out.
pub fn list_logged_in_ids(conn: &Connection) -> Result<Vec<SiteId>> {
    ids_where(conn, "SELECT id FROM sites WHERE logged_out = 0 ORDER BY id")
}

/// Whether any site is stored.
pub fn has_any(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sites", [], |row| row.get(0))?;
    Ok(count > 0)
}

/// Replace the credentials of a site and clear its logged-out flag.
pub fn update_token(
    conn: &Connection,
    site_id: &SiteId,
    token: &str,
    private_token: &str,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sites SET token = ?2, private_token = ?3, logged_out = 0 WHERE id = ?1",
        rusqlite::params![site_id.as_str(), token, private_token],
    )?;
    require_row(changed, site_id)
}

/// Store fresh site info, and config when one was fetched.
pub fn update_info(
    conn: &Connection,
    site_id: &SiteId,
    info: &SiteInfo,
    config: Option<&SiteConfig>,
) -> Result<()> {
    let info = serde_json::to_string(info)?;
    let changed = match config {
        Some(config) => conn.execute(
            "UPDATE sites SET info = ?2, config = ?3 WHERE id = ?1",
            rusqlite::params![site_id.as_str(), info, serde_json::to_string(config)?],
        )?,
        None => conn.execute(
            "UPDATE sites SET info = ?2 WHERE id = ?1",
            rusqlite::params![site_id.as_str(), info],
        )?,
    };
    require_row(changed, site_id)
}

/// Set the logged-out flag. Logging out also discards the credentials.
pub fn set_logged_out(conn: &Connection, site_id: &SiteId, logged_out: bool) -> Result<()> {
    let changed = if logged_out {
        conn.execute(
            "UPDATE sites SET logged_out = 1, token = '', private_token = '' WHERE id = ?1",
            [site_id.as_str()],
        )?
    } else {
        conn.execute(
            "UPDATE sites SET logged_out = 0 WHERE id = ?1",
            [site_id.as_str()],
        )?
    };
    require_row(changed, site_id)
}

/// Remove a site record.
pub fn delete(conn: &Connection, site_id: &SiteId) -> Result<()> {
    conn.execute("DELETE FROM sites WHERE id = ?1", [site_id.as_str()])?;
    Ok(())
}

fn ids_where(conn: &Connection, sql: &str) -> Result<Vec<SiteId>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0).map(SiteId::from))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn require_row(changed: usize, site_id: &SiteId) -> Result<()> {
    if changed == 0 {
        return Err(DbError::NotFound(format!("site '{site_id}'")));
    }
    Ok(())
}

fn row_to_site(row: &Row<'_>) -> rusqlite::Result<SiteRow> {
    Ok(SiteRow {
        id: SiteId::from(row.get::<_, String>(0)?),
        site_url: row.get(1)?,
        token: row.get(2)?,
        private_token: row.get(3)?,
        info: json_column(row, 4)?,
        config: json_column(row, 5)?,
        logged_out: row.get(6)?,
        oauth_id: row.get(7)?,
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let Some(raw) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
