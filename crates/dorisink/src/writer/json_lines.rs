//! JSON Lines serialization for Stream Load payloads.
//!
//! Each row becomes one JSON object keyed by column name in schema order;
//! rows are newline-separated with no trailing newline, which is the shape
//! `read_json_by_line` expects. Keys and string values go through
//! `serde_json`, so embedded quotes, backslashes and control characters are
//! escaped correctly.

use std::sync::Mutex;

use dorisink_core::{CellValue, Result, Row, SinkError};

/// Upper bound on retained buffers; beyond this they are simply dropped.
const MAX_POOLED: usize = 8;

/// Initial capacity for fresh buffers.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// A small pool of serialization buffers.
///
/// Large batches produce multi-megabyte payloads; reusing the backing
/// allocations across flushes keeps the serializer out of the allocator's
/// hot path. Buffers are cleared on release, so `acquire` always returns an
/// empty buffer with warm capacity.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .expect("buffer pool lock poisoned")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY))
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut buffers = self.buffers.lock().expect("buffer pool lock poisoned");
        if buffers.len() < MAX_POOLED {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a batch as JSON Lines into `buf`.
///
/// Cells beyond the column list (or columns beyond the row) are dropped
/// rather than erroring; the mapper guarantees equal lengths in practice.
pub fn build_json_lines(rows: &[Row], columns: &[String], buf: &mut Vec<u8>) -> Result<()> {
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            buf.push(b'\n');
        }
        buf.push(b'{');
        for (j, (col, cell)) in columns.iter().zip(row.iter()).enumerate() {
            if j > 0 {
                buf.push(b',');
            }
            write_json(buf, col)?;
            buf.push(b':');
            write_cell(buf, cell)?;
        }
        buf.push(b'}');
    }
    Ok(())
}

fn write_cell(buf: &mut Vec<u8>, cell: &CellValue) -> Result<()> {
    match cell {
        CellValue::Int(v) => write_json(buf, v),
        CellValue::Float(v) => write_json(buf, v),
        CellValue::Bool(v) => write_json(buf, v),
        CellValue::Str(s) => write_json(buf, s),
        CellValue::Null => {
            buf.extend_from_slice(b"null");
            Ok(())
        }
    }
}

fn write_json<T: serde::Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *buf, value)
        .map_err(|e| SinkError::BatchFlush(format!("json serialization failed: {}", e)))
}
