//! Last-sync bookkeeping in the per-site `sync` table.

use campus_db::records::{self, Filter, Record};
use campus_db::{ColumnSchema, DbError, Result, SiteSchema, TableSchema};
use rusqlite::Connection;
use serde_json::{json, Value};

pub const TABLE: &str = "sync";

/// Name of the core schema owning [`TABLE`].
pub const SCHEMA_NAME: &str = "sync";

/// Core site schema for the sync table.
pub fn site_schema() -> SiteSchema {
    SiteSchema::new(SCHEMA_NAME, 1).table(
        TableSchema::new(TABLE)
            .column(ColumnSchema::text("component").not_null())
            .column(ColumnSchema::text("id").not_null())
            .column(ColumnSchema::integer("time"))
            .column(ColumnSchema::text("warnings"))
            .primary_keys(&["component", "id"]),
    )
}

/// When an entity was last synchronized and what went wrong.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncRecord {
    pub component: String,
    pub id: String,
    /// Milliseconds since epoch; 0 when never synchronized.
    pub time: i64,
    pub warnings: Vec<String>,
}

impl SyncRecord {
    fn from_record(record: &Record) -> Result<Self> {
        let text = |name: &str| {
            record
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let warnings = match record.get("warnings").and_then(Value::as_str) {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => Vec::new(),
        };
        Ok(Self {
            component: text("component"),
            id: text("id"),
            time: record.get("time").and_then(Value::as_i64).unwrap_or(0),
            warnings,
        })
    }
}

fn filter(component: &str, id: &str) -> Filter {
    Filter::new().eq("component", component).eq("id", id)
}

/// Stored record of an entity.
pub fn get_sync_record(conn: &Connection, component: &str, id: &str) -> Result<SyncRecord> {
    let record = records::get(conn, TABLE, &filter(component, id))?;
    SyncRecord::from_record(&record)
}

/// Insert or merge `values` into the record of an entity.
pub fn insert_or_update_sync_record(
    conn: &Connection,
    component: &str,
    id: &str,
    values: Record,
) -> Result<()> {
    let updated = records::update(conn, TABLE, &values, &filter(component, id))?;
    if updated > 0 {
        return Ok(());
    }

    let mut record = values;
    record.insert("component".into(), json!(component));
    record.insert("id".into(), json!(id));
    records::insert(conn, TABLE, &record)
}

/// Last sync time, 0 when never synchronized.
pub fn get_sync_time(conn: &Connection, component: &str, id: &str) -> Result<i64> {
    match get_sync_record(conn, component, id) {
        Ok(record) => Ok(record.time),
        Err(DbError::NotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

pub fn set_sync_time(conn: &Connection, component: &str, id: &str, time: i64) -> Result<()> {
    let mut values = Record::new();
    values.insert("time".into(), json!(time));
    insert_or_update_sync_record(conn, component, id, values)
}

/// Warnings of the last sync, empty when none were stored.
pub fn get_sync_warnings(conn: &Connection, component: &str, id: &str) -> Result<Vec<String>> {
    match get_sync_record(conn, component, id) {
        Ok(record) => Ok(record.warnings),
        Err(DbError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn set_sync_warnings(
    conn: &Connection,
    component: &str,
    id: &str,
    warnings: &[String],
) -> Result<()> {
    let encoded = serde_json::to_string(warnings)?;
    let mut values = Record::new();
    values.insert("warnings".into(), json!(encoded));
    insert_or_update_sync_record(conn, component, id, values)
}

/// Whether more than `interval_ms` passed since the last sync. An entity
/// never synchronized always needs it.
pub fn is_sync_needed(
    conn: &Connection,
    component: &str,
    id: &str,
    interval_ms: i64,
    now: i64,
) -> Result<bool> {
    let time = get_sync_time(conn, component, id)?;
    Ok(time == 0 || now.saturating_sub(time) >= interval_ms)
}
