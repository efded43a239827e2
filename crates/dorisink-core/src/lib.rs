//! Core data model for the dorisink ingestion pipeline: table schema,
//! dynamically typed rows, and the workspace-wide error type.

pub mod error;
pub mod row;
pub mod schema;

pub use error::{Result, SinkError};
pub use row::{estimate_row_size, CellValue, Row};
pub use schema::{Column, ColumnType, Schema};
