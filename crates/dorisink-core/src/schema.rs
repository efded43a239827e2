//! Table schema model.
//!
//! A [`Schema`] is the immutable, ordered list of columns of the target
//! Doris table, built once at startup (either from a `DESCRIBE` against a
//! frontend or from configuration) and shared read-only by the mapper and
//! the writer. Column order is authoritative: rows are vectors indexed by
//! column position, and the JSON Lines payload is keyed in the same order.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SinkError};
use crate::row::CellValue;

/// Internal column types, folded down from Doris's surface types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    BigInt,
    Boolean,
    Float,
    Varchar,
    String,
    Date,
    DateTime,
}

impl ColumnType {
    /// Fold a Doris type string into the internal type set.
    ///
    /// The base type is extracted by stripping any `(...)` length or
    /// precision suffix and upper-casing, so `varchar(255)` and `VARCHAR`
    /// land on the same variant. Unknown types collapse to [`ColumnType::String`],
    /// which round-trips any JSON value through the lossy string coercion.
    pub fn parse_doris(doris_type: &str) -> ColumnType {
        let base = doris_type
            .split('(')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase();

        match base.as_str() {
            "TINYINT" | "SMALLINT" | "INT" | "INTEGER" => ColumnType::Int,
            "BIGINT" => ColumnType::BigInt,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "FLOAT" | "DOUBLE" | "DECIMAL" => ColumnType::Float,
            "CHAR" | "VARCHAR" => ColumnType::Varchar,
            "STRING" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" => ColumnType::String,
            "DATE" => ColumnType::Date,
            "DATETIME" | "TIMESTAMP" => ColumnType::DateTime,
            _ => ColumnType::String,
        }
    }

    /// The value a cell takes when the source field is missing or cannot
    /// be coerced.
    pub fn zero_value(&self) -> CellValue {
        match self {
            ColumnType::Int | ColumnType::BigInt => CellValue::Int(0),
            ColumnType::Boolean => CellValue::Bool(false),
            ColumnType::Float => CellValue::Float(0.0),
            ColumnType::Varchar
            | ColumnType::String
            | ColumnType::Date
            | ColumnType::DateTime => CellValue::Str(String::new()),
        }
    }

    /// Canonical name, matching the accepted spelling in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Float => "FLOAT",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::String => "STRING",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column of the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Immutable ordered column list with a name → index lookup.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
    field_index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema from an ordered column list.
    ///
    /// Column names must be unique; a duplicate is a startup error, never
    /// something to silently last-write-wins on.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(SinkError::SchemaFetch("schema has no columns".to_string()));
        }

        let mut field_index = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            if field_index.insert(col.name.clone(), i).is_some() {
                return Err(SinkError::SchemaFetch(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }

        Ok(Self {
            columns,
            field_index,
        })
    }

    /// Ordered view of the columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns; every mapped row has exactly this many cells.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// Column names in ingest order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema{{")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if i >= 5 {
                write!(f, "... ({} more)", self.columns.len() - 5)?;
                break;
            }
            write!(f, "{}:{}", col.name, col.column_type)?;
        }
        write!(f, "}}")
    }
}
