//! Row and cell model.
//!
//! A row is an ordered vector of dynamically typed cells, one per schema
//! column. The cell is a small tagged sum rather than a trait object or
//! `serde_json::Value`: the writer renders millions of cells per second and
//! dispatching on a four-arm enum is the cheapest way to do that without
//! reflection.

/// A single dynamically typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

/// One ingested record, in schema column order.
pub type Row = Vec<CellValue>;

impl CellValue {
    /// Rough in-memory size used for batch byte accounting: string length
    /// for strings, 8 for everything else. This is an estimate of payload
    /// weight, not of the serialized form.
    pub fn estimated_size(&self) -> usize {
        match self {
            CellValue::Str(s) => s.len(),
            _ => 8,
        }
    }

    /// Tag name, used in log fields and conversion-error metric labels.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Int(_) => "int",
            CellValue::Float(_) => "float",
            CellValue::Bool(_) => "bool",
            CellValue::Str(_) => "string",
            CellValue::Null => "null",
        }
    }
}

/// Estimated payload size of a whole row.
pub fn estimate_row_size(row: &Row) -> usize {
    row.iter().map(|c| c.estimated_size()).sum()
}
