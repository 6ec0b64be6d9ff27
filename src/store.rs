//! Table-scoped row access.
//!
//! Handlers talk to the database through [`Store`] so that every query they
//! issue is a `(table, Filter)` pair the access gate can narrow. Rows travel as
//! JSON objects and are decoded into the typed records of `crate::model` with
//! [`fetch`] / [`fetch_one`].

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub type Row = serde_json::Map<String, Value>;

pub const TABLES: &[&str] = &[
    "departments",
    "users",
    "students",
    "faculty",
    "subjects",
    "faculty_subjects",
    "marks",
    "attendance",
    "fees",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no matching row in {table}")]
    NotFound { table: String },
    #[error("unknown table {0:?}")]
    UnknownTable(String),
    #[error("invalid column name {0:?}")]
    BadColumn(String),
    #[error("refusing unfiltered {op} on {table}")]
    Unfiltered { op: &'static str, table: String },
    #[error("duplicate value violates a unique constraint: {0}")]
    Conflict(String),
    #[error("referenced record does not exist: {0}")]
    MissingReference(String),
    #[error("row decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref f, ref msg) = e {
            if f.code == ErrorCode::ConstraintViolation {
                let detail = msg.clone().unwrap_or_default();
                return match f.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => StoreError::Conflict(detail),
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        StoreError::MissingReference(detail)
                    }
                    _ => StoreError::Sqlite(e),
                };
            }
        }
        StoreError::Sqlite(e)
    }
}

#[derive(Debug, Clone)]
enum Cond {
    Eq(Value),
    In(Vec<Value>),
}

/// Conjunction of column conditions plus an optional ordering.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conds: Vec<(String, Cond)>,
    order: Vec<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conds.push((column.to_string(), Cond::Eq(value.into())));
        self
    }

    /// An empty set matches nothing.
    pub fn is_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.conds.push((column.to_string(), Cond::In(values)));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(column.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conds.is_empty()
    }

    /// Human-readable rendering, used in logs.
    pub fn describe(&self) -> String {
        fn show(v: &Value) -> String {
            match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        }
        self.conds
            .iter()
            .map(|(col, cond)| match cond {
                Cond::Eq(v) => format!("{} = {}", col, show(v)),
                Cond::In(vs) => format!(
                    "{} IN ({})",
                    col,
                    vs.iter().map(show).collect::<Vec<_>>().join(", ")
                ),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn where_clause(&self) -> Result<(String, Vec<SqlValue>), StoreError> {
        if self.conds.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut parts: Vec<String> = Vec::with_capacity(self.conds.len());
        let mut binds: Vec<SqlValue> = Vec::new();
        for (col, cond) in &self.conds {
            check_column(col)?;
            match cond {
                Cond::Eq(Value::Null) => parts.push(format!("{} IS NULL", col)),
                Cond::Eq(v) => {
                    parts.push(format!("{} = ?", col));
                    binds.push(to_sql_value(v));
                }
                Cond::In(vs) if vs.is_empty() => parts.push("0 = 1".to_string()),
                Cond::In(vs) => {
                    let placeholders = std::iter::repeat_n("?", vs.len())
                        .collect::<Vec<_>>()
                        .join(",");
                    parts.push(format!("{} IN ({})", col, placeholders));
                    binds.extend(vs.iter().map(to_sql_value));
                }
            }
        }
        Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
    }

    fn order_clause(&self) -> Result<String, StoreError> {
        if self.order.is_empty() {
            return Ok(String::new());
        }
        for col in &self.order {
            check_column(col)?;
        }
        Ok(format!(" ORDER BY {}", self.order.join(", ")))
    }
}

pub trait Store {
    fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    fn find_one(&self, table: &str, filter: &Filter) -> Result<Row, StoreError> {
        self.find(table, filter)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
            })
    }

    fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Returns the updated rows; `NotFound` when the filter matched nothing.
    fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<Vec<Row>, StoreError>;

    fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError>;
}

pub fn fetch<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .find(table, filter)?
        .into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(StoreError::from))
        .collect()
}

pub fn fetch_one<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    filter: &Filter,
) -> Result<T, StoreError> {
    let row = store.find_one(table, filter)?;
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Like [`fetch_one`] but maps `NotFound` to `None`.
pub fn fetch_optional<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    filter: &Filter,
) -> Result<Option<T>, StoreError> {
    match fetch_one(store, table, filter) {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            other
        )))),
    }
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn select_by_rowids(&self, table: &str, rowids: &[i64]) -> Result<Vec<Row>, StoreError> {
        if rowids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat_n("?", rowids.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT * FROM {} WHERE rowid IN ({}) ORDER BY rowid",
            table, placeholders
        );
        self.query_rows(&sql, rowids.iter().map(|id| SqlValue::Integer(*id)).collect())
    }

    fn query_rows(&self, sql: &str, binds: Vec<SqlValue>) -> Result<Vec<Row>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                let mut row = Row::new();
                for (i, name) in names.iter().enumerate() {
                    row.insert(name.clone(), from_sql_ref(r.get_ref(i)?));
                }
                Ok(row)
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        Ok(rows)
    }
}

impl Store for SqliteStore<'_> {
    fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        check_table(table)?;
        let (where_sql, binds) = filter.where_clause()?;
        let sql = format!(
            "SELECT * FROM {}{}{}",
            table,
            where_sql,
            filter.order_clause()?
        );
        log::trace!("find {} where {}", table, filter.describe());
        self.query_rows(&sql, binds)
    }

    fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        check_table(table)?;
        if row.is_empty() {
            return Err(StoreError::BadColumn(String::new()));
        }
        let mut columns: Vec<&str> = Vec::with_capacity(row.len());
        let mut binds: Vec<SqlValue> = Vec::with_capacity(row.len());
        for (col, v) in &row {
            check_column(col)?;
            columns.push(col.as_str());
            binds.push(to_sql_value(v));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            std::iter::repeat_n("?", columns.len())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.conn.execute(&sql, params_from_iter(binds))?;
        let rowid = self.conn.last_insert_rowid();
        self.select_by_rowids(table, &[rowid])?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
            })
    }

    fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<Vec<Row>, StoreError> {
        check_table(table)?;
        if filter.is_empty() {
            return Err(StoreError::Unfiltered {
                op: "update",
                table: table.to_string(),
            });
        }
        let (where_sql, binds) = filter.where_clause()?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT rowid FROM {}{}", table, where_sql))?;
        let rowids: Vec<i64> = stmt
            .query_map(params_from_iter(binds), |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        if rowids.is_empty() {
            return Err(StoreError::NotFound {
                table: table.to_string(),
            });
        }

        if !patch.is_empty() {
            let mut sets: Vec<String> = Vec::with_capacity(patch.len());
            let mut set_binds: Vec<SqlValue> = Vec::with_capacity(patch.len() + rowids.len());
            for (col, v) in &patch {
                check_column(col)?;
                sets.push(format!("{} = ?", col));
                set_binds.push(to_sql_value(v));
            }
            set_binds.extend(rowids.iter().map(|id| SqlValue::Integer(*id)));
            let sql = format!(
                "UPDATE {} SET {} WHERE rowid IN ({})",
                table,
                sets.join(", "),
                std::iter::repeat_n("?", rowids.len())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            self.conn.execute(&sql, params_from_iter(set_binds))?;
        }
        self.select_by_rowids(table, &rowids)
    }

    fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        check_table(table)?;
        if filter.is_empty() {
            return Err(StoreError::Unfiltered {
                op: "delete",
                table: table.to_string(),
            });
        }
        let (where_sql, binds) = filter.where_clause()?;
        let n = self.conn.execute(
            &format!("DELETE FROM {}{}", table, where_sql),
            params_from_iter(binds),
        )?;
        log::trace!("delete {} where {} removed {}", table, filter.describe(), n);
        Ok(n)
    }
}

fn check_table(table: &str) -> Result<(), StoreError> {
    if TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

fn check_column(col: &str) -> Result<(), StoreError> {
    let ok = !col.is_empty()
        && col
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !col.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(StoreError::BadColumn(col.to_string()))
    }
}

fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}
