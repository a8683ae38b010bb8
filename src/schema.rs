//! Live schema discovery.
//!
//! Workspaces created by older builds carry a narrower `collection` table
//! (and sometimes a differently named quantity column), so every reader and
//! writer asks this module which columns exist instead of assuming the DDL in
//! `db.rs`.

use crate::error::{EngineError, EngineResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub has_default: bool,
}

/// Columns of `table` in declaration order. A missing table (or any error
/// reading the pragma) yields an empty list.
pub fn columns_of(conn: &Connection, table: &str) -> Vec<ColumnInfo> {
    let read = || -> rusqlite::Result<Vec<ColumnInfo>> {
        let mut stmt = conn.prepare(
            "SELECT name, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )?;
        let rows = stmt
            .query_map([table], |row| {
                let not_null: i64 = row.get(1)?;
                let default: Value = row.get(2)?;
                let pk: i64 = row.get(3)?;
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    nullable: not_null == 0,
                    is_primary_key: pk > 0,
                    has_default: !matches!(default, Value::Null),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    };
    read().unwrap_or_default()
}

pub fn has_column(conn: &Connection, table: &str, name: &str) -> bool {
    columns_of(conn, table).iter().any(|c| c.name == name)
}

/// True iff the column is declared NOT NULL without a default.
pub fn is_required(conn: &Connection, table: &str, name: &str) -> bool {
    columns_of(conn, table)
        .iter()
        .any(|c| c.name == name && !c.nullable && !c.has_default)
}

/// Whether `column` alone is guaranteed unique: either the sole primary key
/// column or covered by a single-column UNIQUE index.
pub fn is_unique_key(conn: &Connection, table: &str, column: &str) -> bool {
    let cols = columns_of(conn, table);
    let pk: Vec<&ColumnInfo> = cols.iter().filter(|c| c.is_primary_key).collect();
    if pk.len() == 1 && pk[0].name == column {
        return true;
    }

    let read = || -> rusqlite::Result<bool> {
        let mut idx_stmt =
            conn.prepare("SELECT name FROM pragma_index_list(?) WHERE \"unique\" = 1")?;
        let indexes = idx_stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut info_stmt = conn.prepare("SELECT name FROM pragma_index_info(?)")?;
        for idx in indexes {
            let idx_cols = info_stmt
                .query_map([&idx], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if idx_cols.len() == 1 && idx_cols[0].as_deref() == Some(column) {
                return Ok(true);
            }
        }
        Ok(false)
    };
    read().unwrap_or(false)
}

/// Optional columns of the ownership table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnedColumn {
    CardId,
    ScryId,
    Name,
    SetName,
    Rarity,
    CollectorNumber,
    PaidEur,
    LastEur,
    Condition,
    Comment,
    AcquiredAt,
    UpdatedAt,
}

impl OwnedColumn {
    pub const ALL: [OwnedColumn; 12] = [
        Self::CardId,
        Self::ScryId,
        Self::Name,
        Self::SetName,
        Self::Rarity,
        Self::CollectorNumber,
        Self::PaidEur,
        Self::LastEur,
        Self::Condition,
        Self::Comment,
        Self::AcquiredAt,
        Self::UpdatedAt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CardId => "card_id",
            Self::ScryId => "scry_id",
            Self::Name => "name",
            Self::SetName => "set_name",
            Self::Rarity => "rarity",
            Self::CollectorNumber => "collector_number",
            Self::PaidEur => "paid_eur",
            Self::LastEur => "last_eur",
            Self::Condition => "condition",
            Self::Comment => "comment",
            Self::AcquiredAt => "acquired_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Capability snapshot of the `collection` table.
#[derive(Debug, Clone)]
pub struct CollectionShape {
    qty: &'static str,
    row_id: &'static str,
    present: HashSet<OwnedColumn>,
    pub card_id_required: bool,
    pub card_id_unique: bool,
    pub scry_id_unique: bool,
}

pub const COLLECTION: &str = "collection";

impl CollectionShape {
    pub fn load(conn: &Connection) -> EngineResult<Self> {
        let cols = columns_of(conn, COLLECTION);
        if cols.is_empty() {
            return Err(EngineError::Schema("collection table is missing".into()));
        }
        let has = |name: &str| cols.iter().any(|c| c.name == name);

        let qty = if has("qty") {
            "qty"
        } else if has("quantity") {
            "quantity"
        } else {
            return Err(EngineError::Schema(
                "collection table has no quantity column".into(),
            ));
        };
        // Legacy tables keyed by card_id have no surrogate id; rowid stands in.
        let row_id = if has("id") { "id" } else { "rowid" };

        let present: HashSet<OwnedColumn> = OwnedColumn::ALL
            .into_iter()
            .filter(|c| has(c.name()))
            .collect();
        let card_id_required = is_required(conn, COLLECTION, "card_id");
        let card_id_unique =
            present.contains(&OwnedColumn::CardId) && is_unique_key(conn, COLLECTION, "card_id");
        let scry_id_unique =
            present.contains(&OwnedColumn::ScryId) && is_unique_key(conn, COLLECTION, "scry_id");

        Ok(Self {
            qty,
            row_id,
            present,
            card_id_required,
            card_id_unique,
            scry_id_unique,
        })
    }

    pub fn has(&self, col: OwnedColumn) -> bool {
        self.present.contains(&col)
    }

    pub fn qty(&self) -> &'static str {
        self.qty
    }

    pub fn row_id(&self) -> &'static str {
        self.row_id
    }
}

/// Capability snapshot of the local `cards` table. Older catalogs call the
/// set label `set_name` and the price `eur`.
#[derive(Debug, Clone)]
pub struct CardsShape {
    pub set_label: Option<&'static str>,
    pub collector_number: bool,
    pub rarity: bool,
    pub price: Option<&'static str>,
    pub followed: bool,
}

impl CardsShape {
    /// `None` when there is no usable cards table (absent, or without a
    /// `name` column).
    pub fn load(conn: &Connection) -> Option<Self> {
        let cols = columns_of(conn, "cards");
        let has = |name: &str| cols.iter().any(|c| c.name == name);
        if !has("name") {
            return None;
        }
        let pick = |a: &'static str, b: &'static str| {
            if has(a) {
                Some(a)
            } else if has(b) {
                Some(b)
            } else {
                None
            }
        };
        Some(Self {
            set_label: pick("edition", "set_name"),
            collector_number: has("collector_number"),
            rarity: has("rarity"),
            price: pick("price_eur", "eur"),
            followed: has("followed"),
        })
    }
}

/// Column list + bound values for a single-row INSERT. Only columns that
/// were pushed appear in the statement.
#[derive(Debug, Default)]
pub struct InsertBuilder {
    columns: Vec<&'static str>,
    values: Vec<Value>,
}

impl InsertBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: &'static str, value: impl Into<Value>) -> &mut Self {
        self.columns.push(column);
        self.values.push(value.into());
        self
    }

    pub fn push_if(
        &mut self,
        present: bool,
        column: &'static str,
        value: impl Into<Value>,
    ) -> &mut Self {
        if present {
            self.push(column, value);
        }
        self
    }

    pub fn sql(&self, table: &str) -> String {
        if self.columns.is_empty() {
            return format!("INSERT INTO {table} DEFAULT VALUES");
        }
        let marks = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {table}({}) VALUES({marks})",
            self.columns.join(", ")
        )
    }

    /// Runs the insert and returns the new rowid.
    pub fn execute(&self, conn: &Connection, table: &str) -> rusqlite::Result<i64> {
        conn.execute(&self.sql(table), params_from_iter(self.values.iter()))?;
        Ok(conn.last_insert_rowid())
    }
}

/// SET clause builder. Assignments are raw SQL fragments so callers can use
/// expressions such as `qty = COALESCE(qty, 0) + ?`.
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    sets: Vec<String>,
    values: Vec<Value>,
}

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.sets.push(format!("{column} = ?"));
        self.values.push(value.into());
        self
    }

    pub fn set_expr(&mut self, fragment: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.sets.push(fragment.into());
        self.values.extend(values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn execute(
        self,
        conn: &Connection,
        table: &str,
        where_sql: &str,
        where_values: Vec<Value>,
    ) -> rusqlite::Result<usize> {
        let sql = format!("UPDATE {table} SET {} WHERE {where_sql}", self.sets.join(", "));
        let mut values = self.values;
        values.extend(where_values);
        conn.execute(&sql, params_from_iter(values.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_has_no_columns() {
        let conn = Connection::open_in_memory().expect("open");
        assert!(columns_of(&conn, "collection").is_empty());
        assert!(!has_column(&conn, "collection", "qty"));
        assert!(!is_required(&conn, "collection", "qty"));
        assert!(matches!(
            CollectionShape::load(&conn),
            Err(EngineError::Schema(_))
        ));
    }

    #[test]
    fn required_means_not_null_without_default() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE t(
               id INTEGER PRIMARY KEY,
               a TEXT NOT NULL,
               b INTEGER NOT NULL DEFAULT 1,
               c TEXT
             )",
        )
        .expect("create");
        let cols = columns_of(&conn, "t");
        assert_eq!(
            cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["id", "a", "b", "c"]
        );
        assert!(cols[0].is_primary_key);
        assert!(is_required(&conn, "t", "a"));
        assert!(!is_required(&conn, "t", "b"));
        assert!(!is_required(&conn, "t", "c"));
    }

    #[test]
    fn legacy_collection_shape_is_degraded() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE collection(
               card_id INTEGER PRIMARY KEY,
               quantity INTEGER NOT NULL DEFAULT 1,
               acquired_at TEXT
             )",
        )
        .expect("create");
        let shape = CollectionShape::load(&conn).expect("shape");
        assert_eq!(shape.qty(), "quantity");
        assert_eq!(shape.row_id(), "rowid");
        assert!(shape.has(OwnedColumn::CardId));
        assert!(shape.card_id_unique);
        assert!(!shape.scry_id_unique);
        assert!(!shape.has(OwnedColumn::Condition));
        assert!(!shape.has(OwnedColumn::ScryId));
    }

    #[test]
    fn unique_index_detection() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, card_id INTEGER UNIQUE, other INTEGER);
             CREATE UNIQUE INDEX idx_pair ON t(other, id);",
        )
        .expect("create");
        assert!(is_unique_key(&conn, "t", "card_id"));
        assert!(is_unique_key(&conn, "t", "id"));
        assert!(!is_unique_key(&conn, "t", "other"));
    }

    #[test]
    fn insert_builder_emits_only_pushed_columns() {
        let mut ins = InsertBuilder::new();
        ins.push("name", "Bolt".to_string())
            .push_if(false, "rarity", "Common".to_string())
            .push("qty", 2i64);
        assert_eq!(ins.sql("t"), "INSERT INTO t(name, qty) VALUES(?, ?)");
        assert_eq!(InsertBuilder::new().sql("t"), "INSERT INTO t DEFAULT VALUES");
    }
}
