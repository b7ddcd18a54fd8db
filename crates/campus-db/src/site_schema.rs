//! Versioned per-site schemas and the migrator that installs them.
//!
//! A site schema is a named set of tables owned by one feature, plus an
//! optional data migration run when upgrading from an older installed
//! version. Installed versions are tracked per site in `schema_versions`.
//!
//! A migration pass over one site runs inside a single transaction: either
//! every pending schema is installed or the site is left untouched.

use std::collections::BTreeMap;

use campus_types::SiteId;
use rusqlite::Connection;
use serde::Serialize;

use crate::queries::schema_versions;
use crate::table::{create_table, TableSchema};
use crate::{schema, DbError, Result};

/// Data migration hook: `(conn, old_version, site_id)`.
pub type MigrateFn = fn(&Connection, u32, &SiteId) -> rusqlite::Result<()>;

/// Which sites a schema is installed on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SchemaScope {
    #[default]
    AllSites,
    OnlySite(SiteId),
}

/// A named, versioned set of tables.
#[derive(Clone, Debug)]
pub struct SiteSchema {
    pub name: String,
    pub version: u32,
    pub tables: Vec<TableSchema>,
    pub migrate: Option<MigrateFn>,
    pub scope: SchemaScope,
}

impl SiteSchema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            tables: Vec::new(),
            migrate: None,
            scope: SchemaScope::AllSites,
        }
    }

    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    pub fn migrate(mut self, migrate: MigrateFn) -> Self {
        self.migrate = Some(migrate);
        self
    }

    pub fn only_site(mut self, site_id: SiteId) -> Self {
        self.scope = SchemaScope::OnlySite(site_id);
        self
    }

    pub fn applies_to(&self, site_id: &SiteId) -> bool {
        match &self.scope {
            SchemaScope::AllSites => true,
            SchemaScope::OnlySite(only) => only == site_id,
        }
    }
}

/// All schemas known to the process, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, SiteSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static list of descriptors.
    pub fn with_schemas(schemas: impl IntoIterator<Item = SiteSchema>) -> Self {
        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema);
        }
        registry
    }

    /// Add or replace a schema. Returns the replaced definition.
    pub fn register(&mut self, schema: SiteSchema) -> Option<SiteSchema> {
        self.schemas.insert(schema.name.clone(), schema)
    }

    pub fn get(&self, name: &str) -> Option<&SiteSchema> {
        self.schemas.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// One schema installed or upgraded by a pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedSchema {
    pub name: String,
    pub from: u32,
    pub to: u32,
}

/// Outcome of a migration pass over one site.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub site_id: SiteId,
    pub applied: Vec<AppliedSchema>,
}

impl MigrationReport {
    /// Whether the pass found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Install every pending schema on a site database.
///
/// A schema is pending when its registered version is above the installed
/// one (absent counts as 0). Tables are created first, then `migrate` runs
/// when upgrading from a non-zero version, then the new version is
/// recorded. Any failure rolls back the whole pass.
pub fn apply_site_schemas<'a>(
    conn: &Connection,
    site_id: &SiteId,
    schemas: impl IntoIterator<Item = &'a SiteSchema>,
) -> Result<MigrationReport> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(schema::SCHEMA_VERSIONS_TABLE)?;

    let installed = schema_versions::get_all(&tx)?;
    let mut report = MigrationReport {
        site_id: site_id.clone(),
        applied: Vec::new(),
    };

    for schema in schemas {
        if !schema.applies_to(site_id) {
            continue;
        }

        let old_version = installed.get(&schema.name).copied().unwrap_or(0);
        if schema.version <= old_version {
            continue;
        }

        apply_site_schema(&tx, site_id, schema, old_version).map_err(|e| {
            tracing::warn!(
                site_id = %site_id,
                schema = %schema.name,
                error = %e,
                "Site schema migration failed"
            );
            DbError::SchemaMigrationFailed {
                schema: schema.name.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!(
            site_id = %site_id,
            schema = %schema.name,
            from = old_version,
            to = schema.version,
            "Applied site schema"
        );
        report.applied.push(AppliedSchema {
            name: schema.name.clone(),
            from: old_version,
            to: schema.version,
        });
    }

    tx.commit()?;
    Ok(report)
}

fn apply_site_schema(
    conn: &Connection,
    site_id: &SiteId,
    schema: &SiteSchema,
    old_version: u32,
) -> Result<()> {
    for table in &schema.tables {
        create_table(conn, table)?;
    }

    if old_version > 0 {
        if let Some(migrate) = schema.migrate {
            migrate(conn, old_version, site_id)?;
        }
    }

    schema_versions::set(conn, &schema.name, schema.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{column_exists, table_exists, ColumnSchema};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn site_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        crate::configure(&conn).expect("configure");
        conn
    }

    fn site() -> SiteId {
        SiteId::new("site-1")
    }

    fn notes_v1() -> SiteSchema {
        SiteSchema::new("notes", 1).table(
            TableSchema::new("notes")
                .column(ColumnSchema::integer("id").primary_key())
                .column(ColumnSchema::text("text")),
        )
    }

    static MIGRATE_CALLS: AtomicU32 = AtomicU32::new(0);

    fn add_course_column(conn: &Connection, old_version: u32, _site: &SiteId) -> rusqlite::Result<()> {
        MIGRATE_CALLS.fetch_add(1, Ordering::SeqCst);
        if old_version < 2 {
            conn.execute_batch("ALTER TABLE notes ADD COLUMN course INTEGER")?;
        }
        Ok(())
    }

    fn notes_v2() -> SiteSchema {
        let mut schema = notes_v1().migrate(add_course_column);
        schema.version = 2;
        schema
    }

    #[test]
    fn test_fresh_install_and_noop() {
        let conn = site_db();
        let report = apply_site_schemas(&conn, &site(), [&notes_v1()]).expect("apply");
        assert_eq!(
            report.applied,
            vec![AppliedSchema { name: "notes".into(), from: 0, to: 1 }]
        );
        assert!(table_exists(&conn, "notes").expect("exists"));
        assert_eq!(schema_versions::get(&conn, "notes").expect("version"), 1);

        let again = apply_site_schemas(&conn, &site(), [&notes_v1()]).expect("again");
        assert!(again.is_noop());
    }

    #[test]
    fn test_upgrade_runs_migrate_once() {
        let conn = site_db();
        apply_site_schemas(&conn, &site(), [&notes_v1()]).expect("v1");

        let before = MIGRATE_CALLS.load(Ordering::SeqCst);
        let report = apply_site_schemas(&conn, &site(), [&notes_v2()]).expect("v2");
        assert_eq!(report.applied[0].from, 1);
        assert_eq!(report.applied[0].to, 2);
        assert!(column_exists(&conn, "notes", "course").expect("column"));
        assert_eq!(schema_versions::get(&conn, "notes").expect("version"), 2);

        apply_site_schemas(&conn, &site(), [&notes_v2()]).expect("noop");
        assert_eq!(MIGRATE_CALLS.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_failed_pass_rolls_back() {
        fn broken(_: &Connection, _: u32, _: &SiteId) -> rusqlite::Result<()> {
            Err(rusqlite::Error::InvalidQuery)
        }

        let conn = site_db();
        apply_site_schemas(&conn, &site(), [&notes_v1()]).expect("v1");

        let other = SiteSchema::new("grades", 1)
            .table(TableSchema::new("grades").column(ColumnSchema::integer("id")));
        let mut failing = notes_v1().migrate(broken);
        failing.version = 2;

        let result = apply_site_schemas(&conn, &site(), [&other, &failing]);
        assert!(matches!(
            result,
            Err(DbError::SchemaMigrationFailed { ref schema, .. }) if schema == "notes"
        ));

        // Nothing from the failed pass survives.
        assert!(!table_exists(&conn, "grades").expect("exists"));
        assert!(schema_versions::get(&conn, "grades").is_err());
        assert_eq!(schema_versions::get(&conn, "notes").expect("version"), 1);
    }

    #[test]
    fn test_scope_limits_sites() {
        let conn = site_db();
        let scoped = notes_v1().only_site(SiteId::new("other"));
        let report = apply_site_schemas(&conn, &site(), [&scoped]).expect("apply");
        assert!(report.is_noop());
        assert!(!table_exists(&conn, "notes").expect("exists"));
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let mut registry = SchemaRegistry::with_schemas([notes_v1()]);
        assert_eq!(registry.len(), 1);
        let previous = registry.register(notes_v2());
        assert_eq!(previous.map(|s| s.version), Some(1));
        assert_eq!(registry.get("notes").map(|s| s.version), Some(2));
        assert_eq!(registry.iter().count(), 1);
    }
}
