//! Structural table definitions.
//!
//! Feature schemas describe their tables with [`TableSchema`]; creation is
//! always `CREATE TABLE IF NOT EXISTS`, so applying a definition twice is
//! harmless.

use rusqlite::Connection;

use crate::{DbError, Result};

/// SQLite storage class of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// One column of a [`TableSchema`].
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    /// Literal SQL default expression.
    pub default: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }

    fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A table owned by a site schema.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Composite primary key. Leave empty when a column is marked primary.
    pub primary_keys: Vec<String>,
    /// Composite unique constraints.
    pub unique_keys: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn unique_key(mut self, keys: &[&str]) -> Self {
        self.unique_keys
            .push(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Render the `CREATE TABLE IF NOT EXISTS` statement.
    pub fn create_sql(&self) -> Result<String> {
        validate_identifier(&self.name)?;
        if self.columns.is_empty() {
            return Err(DbError::InvalidIdentifier(format!(
                "table '{}' has no columns",
                self.name
            )));
        }

        let mut parts = Vec::with_capacity(self.columns.len() + 2);
        for column in &self.columns {
            validate_identifier(&column.name)?;
            parts.push(column.definition());
        }

        if !self.primary_keys.is_empty() {
            for key in &self.primary_keys {
                validate_identifier(key)?;
            }
            parts.push(format!("PRIMARY KEY ({})", self.primary_keys.join(", ")));
        }

        for unique in &self.unique_keys {
            for key in unique {
                validate_identifier(key)?;
            }
            parts.push(format!("UNIQUE ({})", unique.join(", ")));
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            parts.join(", ")
        ))
    }
}

/// Create a table if it does not exist yet.
pub fn create_table(conn: &Connection, table: &TableSchema) -> Result<()> {
    conn.execute_batch(&table.create_sql()?)?;
    Ok(())
}

/// Whether a table exists.
pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether a table has a column with the given name.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    validate_identifier(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Add a column unless it already exists.
pub fn add_column(conn: &Connection, table: &str, column: &ColumnSchema) -> Result<()> {
    validate_identifier(table)?;
    validate_identifier(&column.name)?;
    if column_exists(conn, table, &column.name)? {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {}",
        column.definition()
    ))?;
    Ok(())
}

/// Reject anything but ASCII letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments() -> TableSchema {
        TableSchema::new("assignments")
            .column(ColumnSchema::integer("id"))
            .column(ColumnSchema::integer("courseid").not_null())
            .column(ColumnSchema::text("name").default_value("''"))
            .primary_keys(&["id", "courseid"])
            .unique_key(&["courseid", "name"])
    }

    #[test]
    fn test_create_sql() {
        let sql = assignments().create_sql().expect("sql");
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS assignments (id INTEGER, courseid INTEGER NOT NULL, \
             name TEXT DEFAULT '', PRIMARY KEY (id, courseid), UNIQUE (courseid, name))"
        );
    }

    #[test]
    fn test_create_table_twice() {
        let conn = Connection::open_in_memory().expect("open");
        create_table(&conn, &assignments()).expect("first");
        create_table(&conn, &assignments()).expect("second");
        assert!(table_exists(&conn, "assignments").expect("exists"));
        assert!(!table_exists(&conn, "quizzes").expect("exists"));
    }

    #[test]
    fn test_add_column_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        create_table(&conn, &assignments()).expect("create");

        let column = ColumnSchema::integer("duedate");
        add_column(&conn, "assignments", &column).expect("add");
        add_column(&conn, "assignments", &column).expect("add again");
        assert!(column_exists(&conn, "assignments", "duedate").expect("check"));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(validate_identifier("sites").is_ok());
        assert!(validate_identifier("ws_cache_2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a; DROP TABLE sites").is_err());

        let bad = TableSchema::new("t").column(ColumnSchema::text("x y"));
        assert!(matches!(bad.create_sql(), Err(DbError::InvalidIdentifier(_))));

        let empty = TableSchema::new("t");
        assert!(empty.create_sql().is_err());
    }
}
