//! The `wscache` table: reads, writes and invalidation.
//!
//! `expiration_time` holds the instant (ms since epoch) after which an entry
//! is stale. Invalidation sets it to 0, so invalidated entries stay
//! readable as stale data for offline use.

use campus_db::records::{self, Filter, Record};
use campus_db::{ColumnSchema, SiteSchema, TableSchema};
use campus_types::UpdateFrequency;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

use crate::{CachePolicy, Result};

pub const TABLE: &str = "wscache";

/// Name of the core schema owning [`TABLE`].
pub const SCHEMA_NAME: &str = "ws_cache";

/// Core site schema for the cache table.
pub fn site_schema() -> SiteSchema {
    SiteSchema::new(SCHEMA_NAME, 1).table(
        TableSchema::new(TABLE)
            .column(ColumnSchema::text("id").primary_key())
            .column(ColumnSchema::text("data"))
            .column(ColumnSchema::text("key"))
            .column(ColumnSchema::integer("expiration_time"))
            .column(ColumnSchema::text("component"))
            .column(ColumnSchema::integer("component_id")),
    )
}

/// A cached response.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    pub data: Value,
    pub key: Option<String>,
    pub expiration_time: i64,
    pub component: Option<String>,
    pub component_id: Option<i64>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiration_time
    }
}

/// Result of looking an entry up.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Absent,
}

impl CacheLookup {
    fn classify(entry: Option<CacheEntry>, now: i64) -> Self {
        match entry {
            Some(entry) if entry.is_expired(now) => CacheLookup::Stale(entry),
            Some(entry) => CacheLookup::Fresh(entry),
            None => CacheLookup::Absent,
        }
    }

    /// The entry, fresh or stale.
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => Some(entry),
            CacheLookup::Absent => None,
        }
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => Some(entry),
            CacheLookup::Absent => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CacheLookup::Absent)
    }
}

/// Tags and lifetime of a write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteOptions {
    pub cache_key: Option<String>,
    pub component: Option<String>,
    pub component_id: Option<i64>,
    pub update_frequency: UpdateFrequency,
    /// Drop other entries sharing the cache key before writing.
    pub unique_cache_key: bool,
}

const COLUMNS: &str = "id, data, key, expiration_time, component, component_id";

/// Look an entry up by id.
pub fn read(conn: &Connection, id: &str, now: i64) -> Result<CacheLookup> {
    let entry = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ?1"),
            [id],
            row_to_entry,
        )
        .optional()?;
    let lookup = CacheLookup::classify(entry.map(parse_entry).transpose()?, now);
    tracing::debug!(id, fresh = lookup.is_fresh(), absent = lookup.is_absent(), "Cache lookup");
    Ok(lookup)
}

/// Look an entry up by cache key, preferring the row with `id` when several
/// share the key. Falls back to the id when the key has no rows.
pub fn read_by_key(conn: &Connection, key: &str, id: &str, now: i64) -> Result<CacheLookup> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM {TABLE} WHERE key = ?1"))?;
    let rows = stmt
        .query_map([key], row_to_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return read(conn, id, now);
    }

    let position = rows.iter().position(|row| row.id == id).unwrap_or(0);
    let Some(raw) = rows.into_iter().nth(position) else {
        return Ok(CacheLookup::Absent);
    };
    Ok(CacheLookup::classify(Some(parse_entry(raw)?), now))
}

/// Store a response.
pub fn write(
    conn: &Connection,
    policy: &CachePolicy,
    id: &str,
    data: &Value,
    options: &WriteOptions,
    now: i64,
) -> Result<()> {
    if options.unique_cache_key {
        if let Some(key) = &options.cache_key {
            delete_by_key(conn, key)?;
        }
    }

    let expiration_time = now.saturating_add(policy.delay(options.update_frequency));
    let text = serde_json::to_string(data)?;
    let mut record = Record::new();
    record.insert("id".into(), json!(id));
    record.insert("data".into(), json!(text));
    record.insert("expiration_time".into(), json!(expiration_time));
    if let Some(key) = &options.cache_key {
        record.insert("key".into(), json!(key));
    }
    if let Some(component) = &options.component {
        record.insert("component".into(), json!(component));
        if let Some(component_id) = options.component_id {
            record.insert("component_id".into(), json!(component_id));
        }
    }

    records::insert(conn, TABLE, &record)?;
    tracing::debug!(id, key = ?options.cache_key, expiration_time, "Cached response");
    Ok(())
}

/// Delete one entry.
pub fn delete(conn: &Connection, id: &str) -> Result<usize> {
    Ok(records::delete(conn, TABLE, &Filter::new().eq("id", id))?)
}

/// Delete every entry with a cache key.
pub fn delete_by_key(conn: &Connection, key: &str) -> Result<usize> {
    Ok(records::delete(conn, TABLE, &Filter::new().eq("key", key))?)
}

/// Mark every entry with a cache key as stale.
pub fn invalidate_key(conn: &Connection, key: &str) -> Result<usize> {
    if key.is_empty() {
        return Ok(0);
    }
    tracing::debug!(key, "Invalidate cache for key");
    Ok(records::update(conn, TABLE, &expired(), &Filter::new().eq("key", key))?)
}

/// Mark every entry whose key starts with `prefix` as stale.
pub fn invalidate_key_prefix(conn: &Connection, prefix: &str) -> Result<usize> {
    if prefix.is_empty() {
        return Ok(0);
    }
    tracing::debug!(prefix, "Invalidate cache for key prefix");
    // substr comparison keeps `%` and `_` in keys literal.
    let changed = conn.execute(
        &format!(
            "UPDATE {TABLE} SET expiration_time = 0 WHERE substr(key, 1, length(?1)) = ?1"
        ),
        [prefix],
    )?;
    Ok(changed)
}

/// Mark every entry as stale.
pub fn invalidate_all(conn: &Connection) -> Result<usize> {
    tracing::debug!("Invalidate all cache entries");
    Ok(records::update(conn, TABLE, &expired(), &Filter::new())?)
}

/// Mark every entry of a component (optionally one instance) as stale.
pub fn invalidate_component(
    conn: &Connection,
    component: &str,
    component_id: Option<i64>,
) -> Result<usize> {
    if component.is_empty() {
        return Ok(0);
    }
    Ok(records::update(conn, TABLE, &expired(), &component_filter(component, component_id))?)
}

/// Delete every entry of a component (optionally one instance).
pub fn delete_component(
    conn: &Connection,
    component: &str,
    component_id: Option<i64>,
) -> Result<usize> {
    if component.is_empty() {
        return Ok(0);
    }
    Ok(records::delete(conn, TABLE, &component_filter(component, component_id))?)
}

/// Bytes of cached data held for a component (optionally one instance).
pub fn component_size(conn: &Connection, component: &str, component_id: Option<i64>) -> Result<u64> {
    let size: Option<i64> = match component_id {
        Some(component_id) => conn.query_row(
            &format!(
                "SELECT SUM(length(data)) FROM {TABLE} WHERE component = ?1 AND component_id = ?2"
            ),
            rusqlite::params![component, component_id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            &format!("SELECT SUM(length(data)) FROM {TABLE} WHERE component = ?1"),
            [component],
            |row| row.get(0),
        )?,
    };
    Ok(size.unwrap_or(0).max(0) as u64)
}

fn component_filter(component: &str, component_id: Option<i64>) -> Filter {
    let filter = Filter::new().eq("component", component);
    match component_id {
        Some(id) => filter.eq("component_id", id),
        None => filter,
    }
}

fn expired() -> Record {
    let mut values = Record::new();
    values.insert("expiration_time".into(), json!(0));
    values
}

struct RawEntry {
    id: String,
    data: Option<String>,
    key: Option<String>,
    expiration_time: Option<i64>,
    component: Option<String>,
    component_id: Option<i64>,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        data: row.get(1)?,
        key: row.get(2)?,
        expiration_time: row.get(3)?,
        component: row.get(4)?,
        component_id: row.get(5)?,
    })
}

fn parse_entry(raw: RawEntry) -> Result<CacheEntry> {
    let data = match raw.data.as_deref() {
        Some(text) => serde_json::from_str(text)?,
        None => Value::Null,
    };
    Ok(CacheEntry {
        id: raw.id,
        data,
        key: raw.key,
        expiration_time: raw.expiration_time.unwrap_or(0),
        component: raw.component,
        component_id: raw.component_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_db::site_schema::apply_site_schemas;
    use campus_types::SiteId;

    const NOW: i64 = 1_700_000_000_000;

    fn test_db() -> Connection {
        let conn = campus_db::open_memory().expect("open");
        apply_site_schemas(&conn, &SiteId::new("s"), [&site_schema()]).expect("schema");
        conn
    }

    fn keyed(key: &str) -> WriteOptions {
        WriteOptions {
            cache_key: Some(key.into()),
            ..WriteOptions::default()
        }
    }

    #[test]
    fn test_absent_fresh_stale() {
        let conn = test_db();
        let policy = CachePolicy::default();
        assert!(read(&conn, "a", NOW).expect("read").is_absent());

        write(&conn, &policy, "a", &json!({"x": 1}), &WriteOptions::default(), NOW).expect("write");
        let lookup = read(&conn, "a", NOW + 1).expect("read");
        assert!(lookup.is_fresh());
        let entry = lookup.into_entry().expect("entry");
        assert_eq!(entry.data, json!({"x": 1}));
        assert_eq!(entry.expiration_time, NOW + 420_000);

        let later = NOW + 420_000;
        assert!(matches!(read(&conn, "a", later).expect("read"), CacheLookup::Stale(_)));
    }

    #[test]
    fn test_rarely_bucket_lives_longer() {
        let conn = test_db();
        let options = WriteOptions {
            update_frequency: UpdateFrequency::Rarely,
            ..WriteOptions::default()
        };
        write(&conn, &CachePolicy::default(), "a", &json!(1), &options, NOW).expect("write");
        assert!(read(&conn, "a", NOW + 3_600_000).expect("read").is_fresh());
    }

    #[test]
    fn test_invalidate_key_keeps_stale_entry() {
        let conn = test_db();
        let policy = CachePolicy::default();
        write(&conn, &policy, "a", &json!("A"), &keyed("mod:quiz:5"), NOW).expect("write");
        write(&conn, &policy, "b", &json!("B"), &keyed("mod:quiz:6"), NOW).expect("write");

        assert_eq!(invalidate_key(&conn, "mod:quiz:5").expect("invalidate"), 1);
        let lookup = read(&conn, "a", NOW).expect("read");
        assert!(matches!(lookup, CacheLookup::Stale(_)));
        assert_eq!(lookup.into_entry().map(|e| e.data), Some(json!("A")));
        assert!(read(&conn, "b", NOW).expect("read").is_fresh());
    }

    #[test]
    fn test_invalidate_prefix_is_literal() {
        let conn = test_db();
        let policy = CachePolicy::default();
        write(&conn, &policy, "a", &json!(1), &keyed("mod_quiz:attempt:1"), NOW).expect("write");
        write(&conn, &policy, "b", &json!(2), &keyed("mod_quiz:attempt:2"), NOW).expect("write");
        write(&conn, &policy, "c", &json!(3), &keyed("modXquiz:attempt:3"), NOW).expect("write");

        assert_eq!(invalidate_key_prefix(&conn, "mod_quiz:").expect("prefix"), 2);
        assert!(read(&conn, "c", NOW).expect("read").is_fresh());
        assert_eq!(invalidate_key_prefix(&conn, "").expect("empty"), 0);
    }

    #[test]
    fn test_invalidate_all() {
        let conn = test_db();
        let policy = CachePolicy::default();
        write(&conn, &policy, "a", &json!(1), &WriteOptions::default(), NOW).expect("write");
        write(&conn, &policy, "b", &json!(2), &WriteOptions::default(), NOW).expect("write");
        assert_eq!(invalidate_all(&conn).expect("all"), 2);
        assert!(!read(&conn, "a", NOW).expect("read").is_fresh());
    }

    #[test]
    fn test_unique_cache_key_replaces_siblings() {
        let conn = test_db();
        let policy = CachePolicy::default();
        write(&conn, &policy, "a", &json!(1), &keyed("user:prefs"), NOW).expect("write");
        let unique = WriteOptions {
            unique_cache_key: true,
            ..keyed("user:prefs")
        };
        write(&conn, &policy, "b", &json!(2), &unique, NOW).expect("write");

        assert!(read(&conn, "a", NOW).expect("read").is_absent());
        let by_key = read_by_key(&conn, "user:prefs", "zzz", NOW).expect("by key");
        assert_eq!(by_key.entry().map(|e| e.id.as_str()), Some("b"));
    }

    #[test]
    fn test_read_by_key_prefers_matching_id() {
        let conn = test_db();
        let policy = CachePolicy::default();
        write(&conn, &policy, "a", &json!(1), &keyed("k"), NOW).expect("write");
        write(&conn, &policy, "b", &json!(2), &keyed("k"), NOW).expect("write");

        let lookup = read_by_key(&conn, "k", "b", NOW).expect("read");
        assert_eq!(lookup.into_entry().map(|e| e.data), Some(json!(2)));

        // Unknown key falls back to the id.
        let lookup = read_by_key(&conn, "other", "a", NOW).expect("read");
        assert_eq!(lookup.into_entry().map(|e| e.data), Some(json!(1)));
    }

    #[test]
    fn test_component_operations() {
        let conn = test_db();
        let policy = CachePolicy::default();
        let quiz = |id| WriteOptions {
            component: Some("mod_quiz".into()),
            component_id: Some(id),
            ..WriteOptions::default()
        };
        write(&conn, &policy, "a", &json!("aaaa"), &quiz(1), NOW).expect("write");
        write(&conn, &policy, "b", &json!("bb"), &quiz(2), NOW).expect("write");

        assert_eq!(component_size(&conn, "mod_quiz", Some(1)).expect("size"), 6);
        assert_eq!(component_size(&conn, "mod_quiz", None).expect("size"), 10);

        assert_eq!(invalidate_component(&conn, "mod_quiz", Some(2)).expect("inv"), 1);
        assert!(read(&conn, "a", NOW).expect("read").is_fresh());

        assert_eq!(delete_component(&conn, "mod_quiz", None).expect("delete"), 2);
        assert!(read(&conn, "b", NOW).expect("read").is_absent());
        assert_eq!(component_size(&conn, "mod_quiz", None).expect("size"), 0);
    }
}
