//! Generic record operations over any table.
//!
//! Records are JSON objects mapped column by column. Table and column names
//! are validated before they are interpolated; values are always bound.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::{Map, Value};

use crate::table::validate_identifier;
use crate::{DbError, Result};

/// A row as a JSON object.
pub type Record = Map<String, Value>;

/// Conjunction of `column = value` conditions. Empty matches every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render the `WHERE` clause (with leading space) and its bound values,
    /// numbering placeholders from `first_param`.
    fn where_clause(&self, first_param: usize) -> Result<(String, Vec<SqlValue>)> {
        if self.conditions.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut values = Vec::with_capacity(self.conditions.len());
        for (column, value) in &self.conditions {
            validate_identifier(column)?;
            if value.is_null() {
                clauses.push(format!("{column} IS NULL"));
            } else {
                clauses.push(format!("{column} = ?{}", first_param + values.len()));
                values.push(to_sql(value)?);
            }
        }
        Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
    }
}

/// First record matching the filter.
pub fn get(conn: &Connection, table: &str, filter: &Filter) -> Result<Record> {
    validate_identifier(table)?;
    let (clause, values) = filter.where_clause(1)?;
    let sql = format!("SELECT * FROM {table}{clause} LIMIT 1");
    conn.query_row(&sql, params_from_iter(values), row_to_record)
        .map_err(crate::not_found(format!("record in '{table}'")))
}

/// All records matching the filter.
pub fn get_many(conn: &Connection, table: &str, filter: &Filter) -> Result<Vec<Record>> {
    validate_identifier(table)?;
    let (clause, values) = filter.where_clause(1)?;
    let sql = format!("SELECT * FROM {table}{clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_record)?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Every record in the table.
pub fn get_all(conn: &Connection, table: &str) -> Result<Vec<Record>> {
    get_many(conn, table, &Filter::new())
}

/// Insert a record, replacing any row with the same key.
pub fn insert(conn: &Connection, table: &str, record: &Record) -> Result<()> {
    validate_identifier(table)?;
    if record.is_empty() {
        return Err(DbError::Serialization(format!(
            "empty record for '{table}'"
        )));
    }

    let mut columns = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());
    for (i, (column, value)) in record.iter().enumerate() {
        validate_identifier(column)?;
        columns.push(column.as_str());
        placeholders.push(format!("?{}", i + 1));
        values.push(to_sql(value)?);
    }

    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

/// Set `values` on every row matching the filter. Returns the rows changed.
pub fn update(conn: &Connection, table: &str, values: &Record, filter: &Filter) -> Result<usize> {
    validate_identifier(table)?;
    if values.is_empty() {
        return Ok(0);
    }

    let mut sets = Vec::with_capacity(values.len());
    let mut bound = Vec::with_capacity(values.len());
    for (i, (column, value)) in values.iter().enumerate() {
        validate_identifier(column)?;
        sets.push(format!("{column} = ?{}", i + 1));
        bound.push(to_sql(value)?);
    }

    let (clause, filter_values) = filter.where_clause(bound.len() + 1)?;
    bound.extend(filter_values);

    let sql = format!("UPDATE {table} SET {}{clause}", sets.join(", "));
    Ok(conn.execute(&sql, params_from_iter(bound))?)
}

/// Delete every row matching the filter. Returns the rows removed.
pub fn delete(conn: &Connection, table: &str, filter: &Filter) -> Result<usize> {
    validate_identifier(table)?;
    let (clause, values) = filter.where_clause(1)?;
    let sql = format!("DELETE FROM {table}{clause}");
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

/// Number of rows in the table.
pub fn count(conn: &Connection, table: &str) -> Result<u64> {
    count_where(conn, table, &Filter::new())
}

/// Number of rows matching the filter.
pub fn count_where(conn: &Connection, table: &str, filter: &Filter) -> Result<u64> {
    validate_identifier(table)?;
    let (clause, values) = filter.where_clause(1)?;
    let sql = format!("SELECT COUNT(*) FROM {table}{clause}");
    let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested structures are stored as JSON text.
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let stmt: &rusqlite::Statement<'_> = row.as_ref();
    let mut record = Record::new();
    for i in 0..stmt.column_count() {
        let name = stmt.column_name(i)?.to_string();
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::from(v),
            ValueRef::Real(v) => Value::from(v),
            ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::String(hex::encode(v)),
        };
        record.insert(name, value);
    }
    Ok(record)
}
