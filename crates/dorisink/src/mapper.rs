//! JSON → row mapping.
//!
//! Converts a record's JSON payload into a typed row in schema column
//! order. Mapping is lossy but never fatal: an unparseable payload, a
//! missing field, or a type mismatch degrades the affected cells to their
//! column's zero value and bumps a metric. At the ingestion frontier
//! throughput wins over precision; Doris's own `max_filter_ratio` is the
//! second line of defense.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use dorisink_core::{CellValue, Column, ColumnType, Row, Schema};
use dorisink_observability::metrics::{
    FIELD_MISSING, FIELD_TYPE_CONVERSION_ERRORS, JSON_PARSE_ERRORS,
};

/// Label used for document-level parse failures, where no single field is
/// to blame.
const PAYLOAD_FIELD: &str = "_payload";

/// Maps JSON payloads onto rows of a fixed schema.
#[derive(Clone)]
pub struct Mapper {
    schema: Arc<Schema>,
}

impl Mapper {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Map a JSON payload to a row.
    ///
    /// Always returns a row with exactly `schema.column_count()` cells,
    /// each either the coerced field value or the column's zero value.
    pub fn map_json_to_row(&self, payload: &[u8]) -> Row {
        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "payload is not valid json, emitting zero row");
                JSON_PARSE_ERRORS.with_label_values(&[PAYLOAD_FIELD]).inc();
                return self
                    .schema
                    .columns()
                    .iter()
                    .map(|c| c.column_type.zero_value())
                    .collect();
            }
        };

        self.schema
            .columns()
            .iter()
            .map(|col| extract_cell(&doc, col))
            .collect()
    }
}

/// Pull one column's value out of the document, coercing by column type.
fn extract_cell(doc: &Value, col: &Column) -> CellValue {
    let field = match doc.get(&col.name) {
        Some(Value::Null) | None => {
            FIELD_MISSING.with_label_values(&[col.name.as_str()]).inc();
            return col.column_type.zero_value();
        }
        Some(field) => field,
    };

    let coerced = match col.column_type {
        ColumnType::Int | ColumnType::BigInt => field.as_i64().map(CellValue::Int),
        ColumnType::Boolean => field.as_bool().map(CellValue::Bool),
        ColumnType::Float => field.as_f64().map(CellValue::Float),
        ColumnType::Varchar | ColumnType::String | ColumnType::Date | ColumnType::DateTime => {
            field.as_str().map(|s| CellValue::Str(s.to_string()))
        }
    };

    match coerced {
        Some(cell) => cell,
        None => {
            warn!(
                field = %col.name,
                column_type = %col.column_type,
                json_type = json_type_name(field),
                "field type conversion failed, using zero value"
            );
            FIELD_TYPE_CONVERSION_ERRORS
                .with_label_values(&[
                    col.name.as_str(),
                    json_type_name(field),
                    col.column_type.as_str(),
                ])
                .inc();
            col.column_type.zero_value()
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dorisink_core::Column;

    fn mapper(columns: Vec<Column>) -> Mapper {
        Mapper::new(Arc::new(Schema::new(columns).unwrap()))
    }

    fn event_mapper() -> Mapper {
        mapper(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("name", ColumnType::Varchar),
            Column::new("score", ColumnType::Float),
            Column::new("active", ColumnType::Boolean),
        ])
    }

    // ---------------------------------------------------------------
    // Happy path
    // ---------------------------------------------------------------

    #[test]
    fn test_maps_all_fields() {
        let row = event_mapper().map_json_to_row(
            br#"{"id": 7, "name": "alpha", "score": 1.5, "active": true}"#,
        );
        assert_eq!(
            row,
            vec![
                CellValue::Int(7),
                CellValue::Str("alpha".into()),
                CellValue::Float(1.5),
                CellValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_row_length_always_matches_schema() {
        let m = event_mapper();
        for payload in [
            &br#"{}"#[..],
            &br#"{"id": 1}"#[..],
            &br#"not json at all"#[..],
            &br#"{"unrelated": "stuff"}"#[..],
        ] {
            assert_eq!(m.map_json_to_row(payload).len(), 4);
        }
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let row = event_mapper()
            .map_json_to_row(br#"{"id": 1, "name": "a", "score": 0.5, "active": false, "extra": 9}"#);
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], CellValue::Int(1));
    }

    #[test]
    fn test_integer_accepted_for_float_column() {
        let m = mapper(vec![Column::new("v", ColumnType::Float)]);
        assert_eq!(m.map_json_to_row(br#"{"v": 3}"#), vec![CellValue::Float(3.0)]);
    }

    // ---------------------------------------------------------------
    // Degradation: missing fields
    // ---------------------------------------------------------------

    #[test]
    fn test_missing_field_uses_zero_value() {
        let m = mapper(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("flag", ColumnType::Boolean),
        ]);
        let before = FIELD_MISSING.with_label_values(&["flag"]).get();

        let row = m.map_json_to_row(br#"{"id": 42}"#);
        assert_eq!(row, vec![CellValue::Int(42), CellValue::Bool(false)]);
        assert_eq!(FIELD_MISSING.with_label_values(&["flag"]).get(), before + 1);
    }

    #[test]
    fn test_json_null_counts_as_missing() {
        let m = mapper(vec![Column::new("name", ColumnType::String)]);
        let before = FIELD_MISSING.with_label_values(&["name"]).get();

        let row = m.map_json_to_row(br#"{"name": null}"#);
        assert_eq!(row, vec![CellValue::Str("".into())]);
        assert_eq!(FIELD_MISSING.with_label_values(&["name"]).get(), before + 1);
    }

    // ---------------------------------------------------------------
    // Degradation: type mismatches
    // ---------------------------------------------------------------

    #[test]
    fn test_string_for_int_column_degrades() {
        let m = mapper(vec![Column::new("age", ColumnType::Int)]);
        let before = FIELD_TYPE_CONVERSION_ERRORS
            .with_label_values(&["age", "string", "INT"])
            .get();

        let row = m.map_json_to_row(br#"{"age": "not a number"}"#);
        assert_eq!(row, vec![CellValue::Int(0)]);
        assert_eq!(
            FIELD_TYPE_CONVERSION_ERRORS
                .with_label_values(&["age", "string", "INT"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_float_for_int_column_degrades() {
        let m = mapper(vec![Column::new("n", ColumnType::BigInt)]);
        let row = m.map_json_to_row(br#"{"n": 1.5}"#);
        assert_eq!(row, vec![CellValue::Int(0)]);
    }

    #[test]
    fn test_number_for_bool_column_degrades() {
        let m = mapper(vec![Column::new("b", ColumnType::Boolean)]);
        let row = m.map_json_to_row(br#"{"b": 1}"#);
        assert_eq!(row, vec![CellValue::Bool(false)]);
    }

    #[test]
    fn test_number_for_string_column_degrades() {
        let m = mapper(vec![Column::new("s", ColumnType::Varchar)]);
        let row = m.map_json_to_row(br#"{"s": 12}"#);
        assert_eq!(row, vec![CellValue::Str("".into())]);
    }

    #[test]
    fn test_object_for_scalar_column_degrades() {
        let m = mapper(vec![Column::new("v", ColumnType::Int)]);
        let row = m.map_json_to_row(br#"{"v": {"nested": true}}"#);
        assert_eq!(row, vec![CellValue::Int(0)]);
    }

    // ---------------------------------------------------------------
    // Degradation: unparseable payloads
    // ---------------------------------------------------------------

    #[test]
    fn test_invalid_json_yields_full_zero_row() {
        let before = JSON_PARSE_ERRORS.with_label_values(&["_payload"]).get();

        let row = event_mapper().map_json_to_row(b"{{{{");
        assert_eq!(
            row,
            vec![
                CellValue::Int(0),
                CellValue::Str("".into()),
                CellValue::Float(0.0),
                CellValue::Bool(false),
            ]
        );
        assert_eq!(
            JSON_PARSE_ERRORS.with_label_values(&["_payload"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_empty_payload_yields_zero_row() {
        let row = event_mapper().map_json_to_row(b"");
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], CellValue::Int(0));
    }

    #[test]
    fn test_non_object_document_degrades_fields() {
        // A top-level array parses fine but has no named fields.
        let m = mapper(vec![Column::new("id", ColumnType::Int)]);
        let row = m.map_json_to_row(br#"[1, 2, 3]"#);
        assert_eq!(row, vec![CellValue::Int(0)]);
    }
}
